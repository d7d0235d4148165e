// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use tracing::{error, info};

use crate::audio::{CaptureKind, PlaybackParams};
use crate::error::EngineError;
use crate::quantize::{Gate, OpClass};
use crate::session::{ExclusiveMode, LoopId, RecordMode, RoundingMode};
use crate::timing::BoundaryKind;
use crate::undo::UndoSnapshot;

use super::{ActiveMode, Command, Engine, Outcome, ResetTarget, SCHEDULER_TICK_SECONDS};

/// Elapsed times under this are treated as "no time passed at all" when
/// completing an unrounded Multiply/Insert.
const ZERO_ELAPSED: f64 = 1e-9;

/// The capture kind a mode's material comes back as.
fn mode_capture_kind(mode: ExclusiveMode) -> CaptureKind {
    match mode {
        ExclusiveMode::Recording => CaptureKind::Record,
        // Multiply captures an overdub pass across the repeated cycles.
        ExclusiveMode::Overdubbing | ExclusiveMode::Multiplying => CaptureKind::Overdub,
        ExclusiveMode::Inserting => CaptureKind::Insert,
        ExclusiveMode::Substituting => CaptureKind::Substitute,
        ExclusiveMode::Replacing => CaptureKind::Replace,
    }
}

impl Engine {
    pub(crate) fn record(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        if self.registry.get(id)?.flags.recording {
            self.stop_record(id, at)
        } else {
            self.start_record(id, at)
        }
    }

    fn start_record(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.require_no_pending_capture(id, "record")?;
        let available = self.registry.allocator().available(id);
        if available <= 0.0 {
            return Err(EngineError::InsufficientMemory {
                requested_seconds: 0.0,
                available_seconds: available,
            });
        }
        let entry = self.registry.get(id)?;
        if let Some(mode) = entry.flags.exclusive_mode() {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation: "record",
                reason: mode.name(),
            });
        }

        // Re-recording over content is a policy decision, not a given.
        let mut restore_feedback = None;
        if entry.has_audio() {
            match self.session.record_mode {
                RecordMode::Sustain => return Err(EngineError::LoopNotEmpty(id)),
                RecordMode::Toggle => {}
                RecordMode::Safe => restore_feedback = Some(self.session.feedback),
            }
        }

        let entry_snapshot = UndoSnapshot::capture(entry, "record");
        self.undo.snapshot(entry, "record");
        if restore_feedback.is_some() {
            self.session.feedback = 1.0;
        }

        let entry = self.registry.get_mut(id)?;
        entry.flags.set_exclusive(ExclusiveMode::Recording);
        self.active.insert(
            id,
            ActiveMode {
                mode: ExclusiveMode::Recording,
                started_at: at,
                origin_cycle_seconds: 0.0,
                origin_cycles: 0,
                origin_length: 0.0,
                auto_end_at: None,
                restore_feedback,
                last_shown_cycle: 0,
                entry_snapshot,
            },
        );

        if let Err(e) = self.audio.begin_capture(id) {
            error!(err = e.as_ref(), "Error starting capture.");
        }
        info!(loop_id = id.number(), "Recording.");
        self.show("rEC");
        Ok(Outcome::Applied)
    }

    pub(crate) fn stop_record(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        let started_at = self
            .active
            .get(&id)
            .ok_or(EngineError::InvalidTransition {
                loop_id: id,
                operation: "record",
                reason: "not recording",
            })?
            .started_at;
        let elapsed = at - started_at;

        // A denied grant leaves the loop recording; the memory ceiling
        // check will end it at the last length that fits.
        self.registry.set_recorded_length(id, elapsed, at)?;

        let active = self.active.remove(&id).expect("active record entry");
        if let Some(feedback) = active.restore_feedback {
            self.session.feedback = feedback;
        }
        self.registry.get_mut(id)?.flags.clear_exclusive();

        if let Err(e) = self.audio.end_capture(id, CaptureKind::Record) {
            error!(err = e.as_ref(), "Error ending capture.");
        }
        self.expect_completion(id, CaptureKind::Record, at, active.entry_snapshot);

        info!(
            loop_id = id.number(),
            length = format!("{:.3}", elapsed),
            "Recording complete."
        );
        self.show(format!("{:.1}", elapsed));
        Ok(Outcome::Applied)
    }

    pub(crate) fn overdub(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        if self.registry.get(id)?.flags.overdubbing {
            self.stop_overdub(id, at)
        } else {
            self.start_overdub(id, at)
        }
    }

    fn start_overdub(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.require_no_pending_capture(id, "overdub")?;
        let entry = self.registry.get(id)?;
        if entry.is_empty() {
            return Err(EngineError::LoopEmpty(id));
        }
        if let Some(mode) = entry.flags.exclusive_mode() {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation: "overdub",
                reason: mode.name(),
            });
        }

        let entry_snapshot = UndoSnapshot::capture(entry, "overdub");
        self.undo.snapshot(entry, "overdub");

        let entry = self.registry.get_mut(id)?;
        entry.flags.set_exclusive(ExclusiveMode::Overdubbing);
        self.active.insert(
            id,
            ActiveMode {
                mode: ExclusiveMode::Overdubbing,
                started_at: at,
                origin_cycle_seconds: 0.0,
                origin_cycles: 0,
                origin_length: 0.0,
                auto_end_at: None,
                restore_feedback: None,
                last_shown_cycle: 0,
                entry_snapshot,
            },
        );

        if let Err(e) = self.audio.begin_overdub_capture(id) {
            error!(err = e.as_ref(), "Error starting overdub capture.");
        }
        info!(loop_id = id.number(), "Overdubbing.");
        self.show("oVr");
        Ok(Outcome::Applied)
    }

    fn stop_overdub(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        let active = self.active.remove(&id).ok_or(EngineError::InvalidTransition {
            loop_id: id,
            operation: "overdub",
            reason: "not overdubbing",
        })?;

        let ordinal = self.registry.append_layer(id)?;
        self.registry.get_mut(id)?.flags.clear_exclusive();

        if let Err(e) = self.audio.end_capture(id, CaptureKind::Overdub) {
            error!(err = e.as_ref(), "Error ending overdub capture.");
        }
        self.expect_completion(id, CaptureKind::Overdub, at, active.entry_snapshot);

        info!(loop_id = id.number(), layer = ordinal, "Overdub complete.");
        self.show("PLAY");
        Ok(Outcome::Applied)
    }

    pub(crate) fn multiply(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        if self.registry.get(id)?.flags.multiplying {
            self.stop_multiply(id, at, None)
        } else {
            self.start_multiply(id, at)
        }
    }

    fn start_multiply(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.require_no_pending_capture(id, "multiply")?;
        let entry = self.registry.get(id)?;
        if entry.is_empty() {
            return Err(EngineError::LoopEmpty(id));
        }
        if let Some(mode) = entry.flags.exclusive_mode() {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation: "multiply",
                reason: mode.name(),
            });
        }

        let entry_snapshot = UndoSnapshot::capture(entry, "multiply");
        self.undo.snapshot(entry, "multiply");
        let origin_cycle_seconds = entry.cycle_seconds();
        let origin_cycles = entry.cycle_count;
        let origin_length = entry.length_seconds;

        let entry = self.registry.get_mut(id)?;
        entry.flags.set_exclusive(ExclusiveMode::Multiplying);
        self.active.insert(
            id,
            ActiveMode {
                mode: ExclusiveMode::Multiplying,
                started_at: at,
                origin_cycle_seconds,
                origin_cycles,
                origin_length,
                auto_end_at: None,
                restore_feedback: None,
                last_shown_cycle: 0,
                entry_snapshot,
            },
        );

        if let Err(e) = self.audio.begin_overdub_capture(id) {
            error!(err = e.as_ref(), "Error starting multiply capture.");
        }
        info!(loop_id = id.number(), "Multiplying.");
        self.show("MULt");
        Ok(Outcome::Applied)
    }

    /// Ends a multiply. With rounded completion the stop self-defers to the
    /// end of the current cycle; `forced_cycles` bypasses rounding when the
    /// memory ceiling ends the multiply early.
    pub(crate) fn stop_multiply(
        &mut self,
        id: LoopId,
        at: f64,
        forced_cycles: Option<u32>,
    ) -> Result<Outcome, EngineError> {
        let (started_at, cycle_seconds) = {
            let active = self.active.get(&id).ok_or(EngineError::InvalidTransition {
                loop_id: id,
                operation: "multiply",
                reason: "not multiplying",
            })?;
            (active.started_at, active.origin_cycle_seconds)
        };

        if forced_cycles.is_none() && self.session.rounding == RoundingMode::Rounded {
            let distance = self.boundary_distance(id, BoundaryKind::Cycle, at)?;
            if distance > SCHEDULER_TICK_SECONDS {
                // Complete the final cycle before stopping.
                let release_at = at + distance;
                self.scheduler.submit(
                    Command::Multiply(id),
                    id,
                    OpClass::Mode,
                    at,
                    Gate::At(release_at),
                );
                info!(
                    loop_id = id.number(),
                    release_at = release_at,
                    "Rounding multiply to the cycle end."
                );
                return Ok(Outcome::Deferred {
                    release_at,
                    superseded: false,
                });
            }
        }

        let elapsed = at - started_at;
        let (length, cycles) = match forced_cycles {
            Some(fitting) => {
                let cycles = fitting.max(1);
                (cycle_seconds * cycles as f64, cycles)
            }
            None => match self.session.rounding {
                RoundingMode::Rounded => {
                    let cycles = (elapsed / cycle_seconds).round().max(1.0) as u32;
                    (cycle_seconds * cycles as f64, cycles)
                }
                RoundingMode::Unrounded if elapsed < ZERO_ELAPSED => {
                    // Pressed twice in the same instant: nothing changes.
                    let entry = self.registry.get(id)?;
                    (entry.length_seconds, entry.cycle_count.max(1))
                }
                // The loop re-cycles as a single (possibly fractional
                // multiple) cycle.
                RoundingMode::Unrounded => (elapsed, 1),
            },
        };

        self.registry.resize_content(id, length, cycles)?;

        let active = self.active.remove(&id).expect("active multiply entry");
        self.registry.get_mut(id)?.flags.clear_exclusive();

        if let Err(e) = self.audio.end_capture(id, CaptureKind::Overdub) {
            error!(err = e.as_ref(), "Error ending multiply capture.");
        }
        self.expect_completion(id, CaptureKind::Overdub, at, active.entry_snapshot);

        info!(
            loop_id = id.number(),
            cycles = cycles,
            length = format!("{:.3}", length),
            "Multiply complete."
        );
        self.show(format!("{:.1}", length));
        Ok(Outcome::Applied)
    }

    pub(crate) fn insert(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        if self.registry.get(id)?.flags.inserting {
            self.stop_insert(id, at, None)
        } else {
            self.start_insert(id, at)
        }
    }

    fn start_insert(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.require_no_pending_capture(id, "insert")?;
        let entry = self.registry.get(id)?;
        if let Some(mode) = entry.flags.exclusive_mode() {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation: "insert",
                reason: mode.name(),
            });
        }

        let entry_snapshot = UndoSnapshot::capture(entry, "insert");
        self.undo.snapshot(entry, "insert");

        // Insert is legal on an empty loop; it gets the session's default
        // cycle length and its timing starts here.
        let empty = entry.is_empty();
        let origin_cycle_seconds = if empty {
            self.session.default_cycle_seconds
        } else {
            entry.cycle_seconds()
        };
        let origin_cycles = entry.cycle_count;
        let origin_length = entry.length_seconds;

        let entry = self.registry.get_mut(id)?;
        if empty {
            entry.origin_seconds = at;
        }
        entry.flags.set_exclusive(ExclusiveMode::Inserting);
        self.active.insert(
            id,
            ActiveMode {
                mode: ExclusiveMode::Inserting,
                started_at: at,
                origin_cycle_seconds,
                origin_cycles,
                origin_length,
                auto_end_at: None,
                restore_feedback: None,
                last_shown_cycle: 0,
                entry_snapshot,
            },
        );

        if let Err(e) = self.audio.begin_capture(id) {
            error!(err = e.as_ref(), "Error starting insert capture.");
        }
        info!(loop_id = id.number(), "Inserting.");
        self.show("InS");
        Ok(Outcome::Applied)
    }

    /// Ends an insert; the rounding rules mirror
    /// [`stop_multiply`](Self::stop_multiply), with boundaries counted from
    /// the moment the insert began.
    pub(crate) fn stop_insert(
        &mut self,
        id: LoopId,
        at: f64,
        forced_cycles: Option<u32>,
    ) -> Result<Outcome, EngineError> {
        let (started_at, cycle_seconds, origin_cycles, origin_length) = {
            let active = self.active.get(&id).ok_or(EngineError::InvalidTransition {
                loop_id: id,
                operation: "insert",
                reason: "not inserting",
            })?;
            (
                active.started_at,
                active.origin_cycle_seconds,
                active.origin_cycles,
                active.origin_length,
            )
        };

        if forced_cycles.is_none() && self.session.rounding == RoundingMode::Rounded {
            let distance = self.boundary_distance(id, BoundaryKind::Cycle, at)?;
            if distance > SCHEDULER_TICK_SECONDS {
                let release_at = at + distance;
                self.scheduler.submit(
                    Command::Insert(id),
                    id,
                    OpClass::Mode,
                    at,
                    Gate::At(release_at),
                );
                info!(
                    loop_id = id.number(),
                    release_at = release_at,
                    "Rounding insert to the cycle end."
                );
                return Ok(Outcome::Deferred {
                    release_at,
                    superseded: false,
                });
            }
        }

        let elapsed = at - started_at;
        let (length, cycles) = match forced_cycles {
            Some(fitting) => {
                let inserted = fitting.max(1);
                let cycles = origin_cycles + inserted;
                (cycle_seconds * cycles as f64, cycles)
            }
            None => match self.session.rounding {
                RoundingMode::Rounded => {
                    let inserted = (elapsed / cycle_seconds).round().max(1.0) as u32;
                    let cycles = origin_cycles + inserted;
                    (cycle_seconds * cycles as f64, cycles)
                }
                RoundingMode::Unrounded if elapsed < ZERO_ELAPSED && origin_length > 0.0 => {
                    (origin_length, origin_cycles.max(1))
                }
                RoundingMode::Unrounded => (origin_length + elapsed, 1),
            },
        };

        self.registry.resize_content(id, length, cycles)?;
        // The inserted pass is content in its own right.
        self.registry.append_layer(id)?;

        let active = self.active.remove(&id).expect("active insert entry");
        self.registry.get_mut(id)?.flags.clear_exclusive();

        if let Err(e) = self.audio.end_capture(id, CaptureKind::Insert) {
            error!(err = e.as_ref(), "Error ending insert capture.");
        }
        self.expect_completion(id, CaptureKind::Insert, at, active.entry_snapshot);

        info!(
            loop_id = id.number(),
            cycles = cycles,
            length = format!("{:.3}", length),
            "Insert complete."
        );
        self.show(format!("{:.1}", length));
        Ok(Outcome::Applied)
    }

    pub(crate) fn substitute(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.one_pass(id, at, ExclusiveMode::Substituting, "SUb")
    }

    pub(crate) fn replace(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.one_pass(id, at, ExclusiveMode::Replacing, "rPL")
    }

    /// Substitute and Replace share their shape: a capture window of at
    /// most one loop pass whose material lands over the base content.
    fn one_pass(
        &mut self,
        id: LoopId,
        at: f64,
        mode: ExclusiveMode,
        label: &'static str,
    ) -> Result<Outcome, EngineError> {
        let active_now = self.registry.get(id)?.flags.exclusive_mode();
        if active_now == Some(mode) {
            return self.stop_one_pass(id, at, mode);
        }

        self.require_no_pending_capture(id, mode.name())?;
        let entry = self.registry.get(id)?;
        if entry.is_empty() {
            return Err(EngineError::LoopEmpty(id));
        }
        if let Some(current) = active_now {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation: mode.name(),
                reason: current.name(),
            });
        }

        let entry_snapshot = UndoSnapshot::capture(entry, mode.name());
        self.undo.snapshot(entry, mode.name());
        let pass_ends = at + entry.length_seconds;

        let entry = self.registry.get_mut(id)?;
        entry.flags.set_exclusive(mode);
        self.active.insert(
            id,
            ActiveMode {
                mode,
                started_at: at,
                origin_cycle_seconds: 0.0,
                origin_cycles: 0,
                origin_length: 0.0,
                auto_end_at: Some(pass_ends),
                restore_feedback: None,
                last_shown_cycle: 0,
                entry_snapshot,
            },
        );

        if let Err(e) = self.audio.begin_overdub_capture(id) {
            error!(err = e.as_ref(), "Error starting capture pass.");
        }
        info!(loop_id = id.number(), mode = mode.name(), "Capture pass started.");
        self.show(label);
        Ok(Outcome::Applied)
    }

    fn stop_one_pass(
        &mut self,
        id: LoopId,
        at: f64,
        mode: ExclusiveMode,
    ) -> Result<Outcome, EngineError> {
        let active = self.active.remove(&id).ok_or(EngineError::InvalidTransition {
            loop_id: id,
            operation: mode.name(),
            reason: "not active",
        })?;

        self.registry.get_mut(id)?.flags.clear_exclusive();

        let kind = mode_capture_kind(mode);
        if let Err(e) = self.audio.end_capture(id, kind) {
            error!(err = e.as_ref(), "Error ending capture pass.");
        }
        self.expect_completion(id, kind, at, active.entry_snapshot);

        info!(loop_id = id.number(), mode = mode.name(), "Capture pass complete.");
        self.show("PLAY");
        Ok(Outcome::Applied)
    }

    pub(crate) fn toggle_mute(&mut self, id: LoopId) -> Result<Outcome, EngineError> {
        let entry = self.registry.get_mut(id)?;
        entry.flags.muted = !entry.flags.muted;
        let muted = entry.flags.muted;
        self.push_playback_params(id);
        info!(loop_id = id.number(), muted = muted, "Mute toggled.");
        self.show(if muted { "MutE" } else { "PLAY" });
        Ok(Outcome::Applied)
    }

    pub(crate) fn toggle_reverse(&mut self, id: LoopId) -> Result<Outcome, EngineError> {
        let entry = self.registry.get_mut(id)?;
        entry.flags.reversed = !entry.flags.reversed;
        let reversed = entry.flags.reversed;
        self.push_playback_params(id);
        info!(loop_id = id.number(), reversed = reversed, "Reverse toggled.");
        self.show(if reversed { "rEV" } else { "Fd" });
        Ok(Outcome::Applied)
    }

    pub(crate) fn toggle_half_speed(&mut self, id: LoopId) -> Result<Outcome, EngineError> {
        let entry = self.registry.get_mut(id)?;
        entry.flags.half_speed = !entry.flags.half_speed;
        let half_speed = entry.flags.half_speed;
        self.push_playback_params(id);
        info!(loop_id = id.number(), half_speed = half_speed, "Speed toggled.");
        self.show(if half_speed { "H.SP" } else { "F.SP" });
        Ok(Outcome::Applied)
    }

    /// Restarts playback from the loop's start point.
    pub(crate) fn retrigger(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        let entry = self.registry.get_mut(id)?;
        if entry.is_empty() {
            return Err(EngineError::LoopEmpty(id));
        }
        entry.origin_seconds = at - entry.start_offset;
        self.push_playback_params(id);
        info!(loop_id = id.number(), "Retriggered.");
        Ok(Outcome::Applied)
    }

    /// Moves the loop's start point to the current playback position.
    pub(crate) fn set_start_point(&mut self, id: LoopId, at: f64) -> Result<Outcome, EngineError> {
        let entry = self.registry.get(id)?;
        if entry.is_empty() {
            return Err(EngineError::LoopEmpty(id));
        }
        self.undo.snapshot(entry, "start point");

        let position = self.timeline.position_in_loop_at(entry, at);
        let entry = self.registry.get_mut(id)?;
        entry.start_offset = position;
        self.push_playback_params(id);
        info!(
            loop_id = id.number(),
            start_offset = format!("{:.3}", position),
            "Start point set."
        );
        self.show("S.Pt");
        Ok(Outcome::Applied)
    }

    /// Undo: an in-flight function is cancelled outright, then the most
    /// recent snapshot is restored. Pending operations for the loop die
    /// with the history they referenced.
    pub(crate) fn undo_loop(&mut self, id: LoopId) -> Result<Outcome, EngineError> {
        self.registry.get(id)?;
        self.scheduler.cancel_loop(id);

        if let Some(active) = self.active.remove(&id) {
            info!(
                loop_id = id.number(),
                mode = active.mode.name(),
                "Undo is cancelling the active function."
            );
            if let Err(e) = self.audio.end_capture(id, mode_capture_kind(active.mode)) {
                error!(err = e.as_ref(), "Error ending capture.");
            }
            if let Some(feedback) = active.restore_feedback {
                self.session.feedback = feedback;
            }
            self.registry.get_mut(id)?.flags.clear_exclusive();
        }
        // Any in-flight completion now refers to discarded state.
        self.captures.remove(&id);

        let snapshot = self
            .undo
            .undo(id)
            .ok_or(EngineError::NoUndoAvailable(id))?;
        if let Err(err) = self.registry.restore(
            id,
            snapshot.length_seconds,
            snapshot.cycle_count,
            snapshot.start_offset,
            snapshot.flags,
            snapshot.layers.clone(),
        ) {
            // Restoration was refused; the history entry survives.
            self.undo.push(snapshot);
            return Err(err);
        }

        // The legacy session snapshot can capture a loop mid-function;
        // restoring it must not resurrect a mode nothing is driving.
        self.registry.get_mut(id)?.flags.clear_exclusive();

        self.push_playback_params(id);
        info!(loop_id = id.number(), "Undo applied.");
        self.show("Undo");
        Ok(Outcome::Applied)
    }

    pub(crate) fn reset(&mut self, target: ResetTarget) -> Result<Outcome, EngineError> {
        match target {
            ResetTarget::Loop(id) => self.reset_loop(id),
            ResetTarget::All => self.general_reset(),
        }
    }

    /// Clears one loop to empty and releases its memory. Pending operations
    /// are cancelled first so a stale scheduled operation cannot revive the
    /// cleared state.
    fn reset_loop(&mut self, id: LoopId) -> Result<Outcome, EngineError> {
        let entry = self.registry.get(id)?;
        if !entry.is_empty() || entry.flags.exclusive_mode().is_some() {
            self.undo.snapshot(entry, "reset");
        }

        self.scheduler.cancel_loop(id);
        self.captures.remove(&id);
        self.active.remove(&id);
        self.registry.clear(id)?;

        info!(loop_id = id.number(), "Loop reset.");
        self.show("rSt");
        Ok(Outcome::Applied)
    }

    /// Resets every loop. The external sync lock is never dropped.
    fn general_reset(&mut self) -> Result<Outcome, EngineError> {
        self.scheduler.cancel_all();
        self.captures.clear();
        self.active.clear();

        for n in 1..=self.session.loop_count {
            let id = LoopId::new(n);
            let entry = self.registry.get(id)?;
            if !entry.is_empty() {
                self.undo.snapshot(entry, "reset");
            }
            self.registry.clear(id)?;
        }

        info!(sync_locked = self.sync_locked, "General reset.");
        self.show("GrSt");
        Ok(Outcome::Applied)
    }

    /// Starting a new capture while a previous confirmation is outstanding
    /// would leave two captures racing for one completion slot.
    fn require_no_pending_capture(
        &self,
        id: LoopId,
        operation: &'static str,
    ) -> Result<(), EngineError> {
        if self.capture_pending(id) {
            return Err(EngineError::InvalidTransition {
                loop_id: id,
                operation,
                reason: "previous capture unconfirmed",
            });
        }
        Ok(())
    }

    /// Pushes the loop's current playback parameters to the audio engine.
    pub(crate) fn push_playback_params(&self, id: LoopId) {
        let entry = match self.registry.get(id) {
            Ok(entry) => entry,
            Err(_) => return,
        };
        let params = PlaybackParams {
            reversed: entry.flags.reversed,
            half_speed: entry.flags.half_speed,
            muted: entry.flags.muted,
            start_offset: entry.start_offset,
        };
        if let Err(e) = self.audio.set_playback_params(id, params) {
            error!(err = e.as_ref(), "Error setting playback params.");
        }
    }
}
