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
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, span, warn, Level, Span};

use crate::audio::{self, CaptureKind, Completion};
use crate::display::{Control, DisplayEvent, LedColor, LedState, Surface};
use crate::error::EngineError;
use crate::midi;
use crate::quantize::{Gate, OpClass, Scheduler, Submission};
use crate::registry::LoopRegistry;
use crate::session::{
    ExclusiveMode, LoopId, QuantizeMode, Session, SwitchQuantize, MAX_LOOPS,
};
use crate::timing::{BoundaryKind, Timeline};
use crate::undo::{UndoManager, UndoSnapshot};

mod switcher;
mod transport;


/// The scheduler tick. Boundaries computed to land within one tick are
/// applied immediately instead of waiting out a full grid period.
pub const SCHEDULER_TICK_SECONDS: f64 = 0.005;

/// The crossfade level used when a Substitute pass is blended over the
/// base material. Replace overwrites at full level.
const SUBSTITUTE_BLEND: f64 = 0.5;

/// How loop content is copied between slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Audio layer references only; the target becomes non-empty.
    Audio,
    /// Cycle count and length only; the target's audio is untouched.
    Timing,
    /// Both.
    Full,
}

/// What a reset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Loop(LoopId),
    All,
}

/// The intents the transport accepts. Front panel, MIDI and keyboard input
/// all funnel into this one surface and share its validation path.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Record(LoopId),
    Overdub(LoopId),
    Multiply(LoopId),
    Insert(LoopId),
    Substitute(LoopId),
    Replace(LoopId),
    Mute(LoopId),
    Reverse(LoopId),
    HalfSpeed(LoopId),
    Undo(LoopId),
    Retrigger(LoopId),
    StartPoint(LoopId),
    SwitchLoop(LoopId),
    NextLoop,
    PrevLoop,
    Confirm,
    Copy {
        source: LoopId,
        target: LoopId,
        mode: CopyMode,
    },
    Reset(ResetTarget),
    SetQuantize(QuantizeMode),
    SetLoopCount(usize),
}

impl Command {
    /// The loop the command operates on, if it names one.
    fn target_loop(&self) -> Option<LoopId> {
        match self {
            Command::Record(id)
            | Command::Overdub(id)
            | Command::Multiply(id)
            | Command::Insert(id)
            | Command::Substitute(id)
            | Command::Replace(id)
            | Command::Mute(id)
            | Command::Reverse(id)
            | Command::HalfSpeed(id)
            | Command::Undo(id)
            | Command::Retrigger(id)
            | Command::StartPoint(id)
            | Command::SwitchLoop(id) => Some(*id),
            _ => None,
        }
    }
}

/// How a command landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// Applied on this tick.
    Applied,
    /// Deferred to a quantization boundary.
    Deferred { release_at: f64, superseded: bool },
    /// Held until an explicit confirm command.
    AwaitingConfirm,
}

/// Which quantization class governs the command, if any. Commands with no
/// class are always applied immediately.
fn quantize_class(command: &Command) -> Option<OpClass> {
    match command {
        Command::Record(_) => Some(OpClass::Record),
        Command::Overdub(_) => Some(OpClass::Overdub),
        Command::Multiply(_)
        | Command::Insert(_)
        | Command::Substitute(_)
        | Command::Replace(_) => Some(OpClass::Mode),
        Command::Mute(_) => Some(OpClass::Mute),
        Command::Reverse(_) => Some(OpClass::Reverse),
        Command::HalfSpeed(_) => Some(OpClass::Speed),
        Command::Retrigger(_) => Some(OpClass::Trigger),
        Command::SwitchLoop(_) => Some(OpClass::Switch),
        _ => None,
    }
}

fn quantize_boundary(mode: QuantizeMode) -> Option<BoundaryKind> {
    match mode {
        QuantizeMode::Off => None,
        QuantizeMode::Cycle => Some(BoundaryKind::Cycle),
        QuantizeMode::Loop => Some(BoundaryKind::Loop),
        QuantizeMode::Subdivision => Some(BoundaryKind::Subdivision),
    }
}

fn switch_boundary(mode: SwitchQuantize) -> Option<BoundaryKind> {
    match mode {
        SwitchQuantize::Off | SwitchQuantize::Confirm => None,
        SwitchQuantize::Cycle => Some(BoundaryKind::Cycle),
        SwitchQuantize::Loop => Some(BoundaryKind::Loop),
    }
}

/// Bookkeeping for a loop's active exclusive mode. Created when the mode is
/// entered and consumed when it ends.
pub(crate) struct ActiveMode {
    pub mode: ExclusiveMode,
    pub started_at: f64,
    /// The cycle grid in effect when the mode started. Multiply/Insert keep
    /// counting on this grid even while the loop's visible cycle count is
    /// updated underneath them.
    pub origin_cycle_seconds: f64,
    pub origin_cycles: u32,
    pub origin_length: f64,
    /// When a single-pass mode (Substitute/Replace) ends on its own.
    pub auto_end_at: Option<f64>,
    /// Safe record: feedback value to put back once the operation ends.
    pub restore_feedback: Option<f64>,
    /// The last cycle number shown on the display.
    pub last_shown_cycle: u32,
    /// The loop as it was when the mode was entered; the rollback target if
    /// the audio engine never confirms the capture.
    pub entry_snapshot: UndoSnapshot,
}

/// A capture whose audio-engine confirmation is still outstanding. The
/// snapshot is the rollback target if the confirmation never arrives.
struct PendingCapture {
    kind: CaptureKind,
    issued_at: f64,
    snapshot: UndoSnapshot,
}

/// The loop transport engine: a strictly sequential reactor over commands,
/// scheduler ticks and audio-engine completions. One intent is fully
/// processed before the next is accepted; waiting is represented as pending
/// operations, never as a suspended call stack.
pub struct Engine {
    session: Session,
    registry: LoopRegistry,
    scheduler: Scheduler,
    undo: UndoManager,
    timeline: Timeline,
    audio: Arc<dyn audio::Engine>,
    midi_device: Option<Arc<dyn midi::Device>>,
    surface: Arc<dyn Surface>,
    active: HashMap<LoopId, ActiveMode>,
    captures: HashMap<LoopId, PendingCapture>,
    /// External sync lock. GeneralReset never drops it.
    sync_locked: bool,
    span: Span,
}

impl Engine {
    /// Creates an engine for the given session.
    pub fn new(
        session: Session,
        timeline: Timeline,
        audio: Arc<dyn audio::Engine>,
        midi_device: Option<Arc<dyn midi::Device>>,
        surface: Arc<dyn Surface>,
    ) -> Engine {
        let registry = LoopRegistry::new(
            session.loop_count,
            session.total_memory_seconds,
            session.max_loop_seconds,
        );
        let undo = UndoManager::new(session.undo_depth);
        Engine {
            session,
            registry,
            scheduler: Scheduler::new(),
            undo,
            timeline,
            audio,
            midi_device,
            surface,
            active: HashMap::new(),
            captures: HashMap::new(),
            sync_locked: false,
            span: span!(Level::INFO, "engine"),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn loops(&self) -> &LoopRegistry {
        &self.registry
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// True while a capture confirmation is outstanding for the loop.
    pub fn capture_pending(&self, id: LoopId) -> bool {
        self.captures.contains_key(&id)
    }

    /// Processes one command: validates it, applies it, or defers it to a
    /// quantization boundary.
    pub fn command(&mut self, command: Command) -> Result<Outcome, EngineError> {
        let span = self.span.clone();
        let _enter = span.enter();
        let now = self.timeline.now_seconds();

        // Relative switches resolve against the current active loop up
        // front so a deferred switch lands on the loop the performer saw.
        let command = match command {
            Command::NextLoop => {
                Command::SwitchLoop(self.session.next_loop(self.session.active_loop))
            }
            Command::PrevLoop => {
                Command::SwitchLoop(self.session.prev_loop(self.session.active_loop))
            }
            other => other,
        };

        // The legacy whole-session snapshot backs up the per-loop undo
        // stacks. Undo itself must not overwrite it.
        if !matches!(command, Command::Undo(_)) {
            self.undo.begin_operation(self.registry.iter());
        }

        info!(command = format!("{:?}", command), "Received command.");

        match quantize_class(&command) {
            Some(class) => self.defer_or_apply(command, class, now),
            None => self.apply(command, now),
        }
    }

    /// Defers the command to its quantization boundary, or applies it now
    /// if no quantization is in effect (or the boundary is upon us).
    fn defer_or_apply(
        &mut self,
        command: Command,
        class: OpClass,
        now: f64,
    ) -> Result<Outcome, EngineError> {
        // Switches are keyed (and their boundary computed) on the loop
        // being left, so consecutive switch requests supersede each other.
        let pending_loop = if class == OpClass::Switch {
            self.session.active_loop
        } else {
            command.target_loop().expect("quantized commands name a loop")
        };

        if let Some(target) = command.target_loop() {
            self.registry.get(target)?;
        }

        if class == OpClass::Switch && self.session.switch_quantize == SwitchQuantize::Confirm {
            let submission =
                self.scheduler
                    .submit(command, pending_loop, class, now, Gate::Confirm);
            self.note_superseded(pending_loop, class, submission);
            self.refresh_leds();
            return Ok(Outcome::AwaitingConfirm);
        }

        let boundary = if class == OpClass::Switch {
            switch_boundary(self.session.switch_quantize)
        } else {
            quantize_boundary(self.session.quantize)
        };
        let kind = match boundary {
            Some(kind) => kind,
            None => return self.apply(command, now),
        };

        let distance = self.boundary_distance(pending_loop, kind, now)?;
        if distance <= SCHEDULER_TICK_SECONDS {
            // On (or within clock drift of) the boundary already.
            return self.apply(command, now);
        }

        let release_at = now + distance;
        let submission =
            self.scheduler
                .submit(command, pending_loop, class, now, Gate::At(release_at));
        let superseded = self.note_superseded(pending_loop, class, submission);
        self.refresh_leds();
        Ok(Outcome::Deferred {
            release_at,
            superseded,
        })
    }

    fn note_superseded(&self, loop_id: LoopId, class: OpClass, submission: Submission) -> bool {
        if submission != Submission::Superseded {
            return false;
        }
        let conflict = EngineError::SchedulerConflict {
            loop_id,
            superseded: class.name(),
        };
        warn!(err = conflict.to_string(), "Pending operation superseded.");
        self.surface
            .display(DisplayEvent::new(conflict.display_code()));
        true
    }

    /// Time until the next boundary of the given kind for the loop. During
    /// an active Multiply/Insert the cycle grid in effect when the mode
    /// started wins over the loop's (moving) cycle count.
    fn boundary_distance(
        &self,
        id: LoopId,
        kind: BoundaryKind,
        at: f64,
    ) -> Result<f64, EngineError> {
        let entry = self.registry.get(id)?;
        if kind == BoundaryKind::Cycle {
            if let Some(active) = self.active.get(&id) {
                if matches!(
                    active.mode,
                    ExclusiveMode::Multiplying | ExclusiveMode::Inserting
                ) {
                    let anchor = if active.mode == ExclusiveMode::Inserting {
                        active.started_at
                    } else {
                        entry.origin_seconds
                    };
                    return Ok(crate::timing::grid_distance(
                        at - anchor,
                        active.origin_cycle_seconds,
                    ));
                }
            }
        }
        Ok(self.timeline.time_to_next_boundary(
            entry,
            kind,
            self.session.subdivisions_per_cycle,
            at,
        ))
    }

    /// Applies a command at the given effective time. Deferred commands are
    /// applied at their boundary time, not at the tick that released them,
    /// so quantized lengths come out exact.
    fn apply(&mut self, command: Command, at: f64) -> Result<Outcome, EngineError> {
        let result = match command {
            Command::Record(id) => self.record(id, at),
            Command::Overdub(id) => self.overdub(id, at),
            Command::Multiply(id) => self.multiply(id, at),
            Command::Insert(id) => self.insert(id, at),
            Command::Substitute(id) => self.substitute(id, at),
            Command::Replace(id) => self.replace(id, at),
            Command::Mute(id) => self.toggle_mute(id),
            Command::Reverse(id) => self.toggle_reverse(id),
            Command::HalfSpeed(id) => self.toggle_half_speed(id),
            Command::Retrigger(id) => self.retrigger(id, at),
            Command::StartPoint(id) => self.set_start_point(id, at),
            Command::Undo(id) => self.undo_loop(id),
            Command::Reset(target) => self.reset(target),
            Command::SwitchLoop(id) => self.switch_loop(id, at),
            Command::NextLoop => {
                let target = self.session.next_loop(self.session.active_loop);
                self.switch_loop(target, at)
            }
            Command::PrevLoop => {
                let target = self.session.prev_loop(self.session.active_loop);
                self.switch_loop(target, at)
            }
            Command::Confirm => self.confirm_switch(at),
            Command::Copy {
                source,
                target,
                mode,
            } => self.copy(source, target, mode),
            Command::SetQuantize(mode) => self.set_quantize(mode),
            Command::SetLoopCount(count) => self.set_loop_count(count, false),
        };

        match &result {
            Ok(_) => {
                self.assert_invariants();
                self.refresh_leds();
            }
            Err(err) => self.report(err),
        }
        result
    }

    /// Releases due pending operations and runs the engine's time-driven
    /// housekeeping. Driven by the controller's tick interval; the engine
    /// itself never sleeps.
    pub fn tick(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();
        let now = self.timeline.now_seconds();

        for pending in self.scheduler.take_due(now) {
            let release_at = match pending.gate {
                Gate::At(at) => at,
                Gate::Confirm => now,
            };
            info!(
                command = format!("{:?}", pending.command),
                release_at = release_at,
                "Releasing quantized operation."
            );
            // Failures are reported inside apply; a failed release must not
            // stall the remaining due operations.
            let _ = self.apply(pending.command, release_at);
        }

        self.auto_terminate_single_pass(now);
        self.enforce_memory_ceiling(now);
        self.update_cycle_displays(now);
        self.expire_captures(now);
    }

    /// Applies an audio-engine completion. The completion may arrive many
    /// ticks after the intent; state is re-validated before anything is
    /// touched, and completions for since-cleared loops are discarded.
    pub fn completion(&mut self, completion: Completion) {
        let _enter = self.span.enter();

        let pending = match self.captures.remove(&completion.loop_id) {
            Some(pending) => pending,
            None => {
                info!(
                    loop_id = completion.loop_id.number(),
                    "Discarding completion with no pending capture."
                );
                return;
            }
        };
        if pending.kind != completion.kind {
            warn!(
                loop_id = completion.loop_id.number(),
                expected = pending.kind.name(),
                got = completion.kind.name(),
                "Discarding mismatched completion."
            );
            return;
        }

        let empty = match self.registry.get(completion.loop_id) {
            Ok(entry) => entry.is_empty(),
            Err(_) => return,
        };
        if empty {
            info!(
                loop_id = completion.loop_id.number(),
                "Loop cleared since capture; discarding completion."
            );
            return;
        }

        match completion.kind {
            CaptureKind::Record | CaptureKind::Overdub | CaptureKind::Insert => {
                if let Ok(entry) = self.registry.get_mut(completion.loop_id) {
                    if let Some(layer) = entry.layers.iter_mut().rev().find(|l| l.buffer.is_none())
                    {
                        layer.buffer = Some(completion.buffer);
                    }
                }
            }
            CaptureKind::Substitute | CaptureKind::Replace => {
                let level = if completion.kind == CaptureKind::Replace {
                    1.0
                } else {
                    SUBSTITUTE_BLEND
                };
                let base = self
                    .registry
                    .get(completion.loop_id)
                    .ok()
                    .and_then(|entry| entry.layers.first())
                    .and_then(|layer| layer.buffer);
                let blended = match base {
                    Some(base) => match self.audio.mix(base, completion.buffer, level) {
                        Ok(mixed) => Some(mixed),
                        Err(e) => {
                            error!(err = e.as_ref(), "Error mixing captured pass.");
                            None
                        }
                    },
                    // No confirmed base to blend onto; the captured pass
                    // becomes the base.
                    None => Some(completion.buffer),
                };
                if let Some(buffer) = blended {
                    if let Ok(entry) = self.registry.get_mut(completion.loop_id) {
                        if let Some(layer) = entry.layers.first_mut() {
                            layer.buffer = Some(buffer);
                        }
                    }
                }
            }
        }

        info!(
            loop_id = completion.loop_id.number(),
            kind = completion.kind.name(),
            "Capture confirmed."
        );
    }

    /// Substitute/Replace run for exactly one pass unless stopped earlier.
    fn auto_terminate_single_pass(&mut self, now: f64) {
        let expiring: Vec<(LoopId, ExclusiveMode, f64)> = self
            .active
            .iter()
            .filter_map(|(id, active)| {
                active
                    .auto_end_at
                    .filter(|end| *end <= now)
                    .map(|end| (*id, active.mode, end))
            })
            .collect();

        for (id, mode, end) in expiring {
            info!(
                loop_id = id.number(),
                mode = mode.name(),
                "Single pass complete; ending mode."
            );
            let command = match mode {
                ExclusiveMode::Substituting => Command::Substitute(id),
                ExclusiveMode::Replacing => Command::Replace(id),
                _ => continue,
            };
            let _ = self.apply(command, end);
        }
    }

    /// Stops growth operations that are about to outrun the memory budget:
    /// a recording stops at the slot ceiling, a multiply/insert stops at
    /// the last cycle count that fits.
    fn enforce_memory_ceiling(&mut self, now: f64) {
        let mut forced: Vec<(LoopId, ExclusiveMode, f64, Option<u32>)> = Vec::new();

        for (id, active) in self.active.iter() {
            let available = self.registry.allocator().available(*id);
            let elapsed = now - active.started_at;
            match active.mode {
                ExclusiveMode::Recording if elapsed >= available => {
                    forced.push((*id, active.mode, active.started_at + available, None));
                }
                ExclusiveMode::Multiplying | ExclusiveMode::Inserting => {
                    let grid = active.origin_cycle_seconds;
                    let base = if active.mode == ExclusiveMode::Inserting {
                        active.origin_length
                    } else {
                        0.0
                    };
                    let next_cycles = (elapsed / grid).floor() as u32 + 1;
                    let projected = base + grid * next_cycles as f64;
                    if projected > available + crate::memory::BUDGET_EPSILON {
                        let fitting = ((available - base) / grid).floor().max(0.0) as u32;
                        forced.push((*id, active.mode, now, Some(fitting)));
                    }
                }
                _ => {}
            }
        }

        for (id, mode, at, fitting) in forced {
            warn!(
                loop_id = id.number(),
                mode = mode.name(),
                "Memory budget reached; ending mode."
            );
            self.show("FULL");
            let result = match mode {
                ExclusiveMode::Recording => self.stop_record(id, at),
                ExclusiveMode::Multiplying => self.stop_multiply(id, at, fitting),
                ExclusiveMode::Inserting => self.stop_insert(id, at, fitting),
                _ => continue,
            };
            if let Err(err) = result {
                self.report(&err);
            } else {
                self.refresh_leds();
            }
        }
    }

    /// While Multiply/Insert are counting, the loop's cycle count follows
    /// the pass the performer is in and the display shows it.
    fn update_cycle_displays(&mut self, now: f64) {
        let mut shown: Vec<(LoopId, u32, u32)> = Vec::new();
        for (id, active) in self.active.iter_mut() {
            if !matches!(
                active.mode,
                ExclusiveMode::Multiplying | ExclusiveMode::Inserting
            ) {
                continue;
            }
            let elapsed = now - active.started_at;
            let current = (elapsed / active.origin_cycle_seconds).floor() as u32 + 1;
            if current != active.last_shown_cycle {
                active.last_shown_cycle = current;
                let display_count = if active.mode == ExclusiveMode::Inserting {
                    active.origin_cycles + current
                } else {
                    current
                };
                shown.push((*id, current, display_count));
            }
        }

        for (id, current, display_count) in shown {
            if let Ok(entry) = self.registry.get_mut(id) {
                entry.cycle_count = display_count;
            }
            info!(loop_id = id.number(), cycle = current, "Cycle.");
            self.show(format!("C {}", display_count));
        }
    }

    /// Rolls back captures whose confirmation never arrived.
    fn expire_captures(&mut self, now: f64) {
        let timeout = self.session.external_timeout_seconds;
        let expired: Vec<LoopId> = self
            .captures
            .iter()
            .filter(|(_, capture)| now - capture.issued_at > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let capture = self.captures.remove(&id).expect("capture present");
            let err = EngineError::ExternalTimeout {
                loop_id: id,
                operation: capture.kind.name(),
            };
            self.report(&err);
            self.rollback(capture.snapshot);
            self.refresh_leds();
        }
    }

    /// Restores a loop to a snapshot after a failed external operation.
    fn rollback(&mut self, snapshot: UndoSnapshot) {
        let id = snapshot.loop_id;
        if let Err(e) = self.registry.restore(
            id,
            snapshot.length_seconds,
            snapshot.cycle_count,
            snapshot.start_offset,
            snapshot.flags,
            snapshot.layers,
        ) {
            warn!(
                loop_id = id.number(),
                err = e.to_string(),
                "Unable to roll back loop."
            );
        }
    }

    /// Registers the pending confirmation for a capture-ending operation.
    pub(crate) fn expect_completion(
        &mut self,
        id: LoopId,
        kind: CaptureKind,
        issued_at: f64,
        snapshot: UndoSnapshot,
    ) {
        self.captures.insert(
            id,
            PendingCapture {
                kind,
                issued_at,
                snapshot,
            },
        );
    }

    pub(crate) fn set_quantize(&mut self, mode: QuantizeMode) -> Result<Outcome, EngineError> {
        info!(mode = format!("{:?}", mode), "Setting quantize mode.");
        self.session.quantize = mode;
        self.show(match mode {
            QuantizeMode::Off => "OFF",
            QuantizeMode::Cycle => "CYC",
            QuantizeMode::Loop => "LOP",
            QuantizeMode::Subdivision => "SUb",
        });
        Ok(Outcome::Applied)
    }

    /// Changes the number of loop slots. Content in slots that survive is
    /// kept if it fits the new even share; otherwise the change is refused
    /// (or, when forced, the blocking loops are cleared).
    pub(crate) fn set_loop_count(
        &mut self,
        count: usize,
        force: bool,
    ) -> Result<Outcome, EngineError> {
        if count < 1 || count > MAX_LOOPS {
            return Err(EngineError::InvalidTransition {
                loop_id: self.session.active_loop,
                operation: "set loop count",
                reason: "loop count must be between 1 and 16",
            });
        }
        if count == self.session.loop_count {
            return Ok(Outcome::Applied);
        }

        self.registry.resize(count, force)?;

        // Anything aimed at a slot that no longer exists dies with it.
        for n in (count + 1)..=self.session.loop_count {
            let id = LoopId::new(n);
            self.scheduler.cancel_loop(id);
            self.captures.remove(&id);
            self.active.remove(&id);
            self.undo.clear_loop(id);
        }

        self.session.loop_count = count;
        if self.session.active_loop.number() > count {
            self.session.active_loop = LoopId::new(1);
        }

        info!(loop_count = count, "Loop count changed.");
        self.show(format!("L {}", count));
        Ok(Outcome::Applied)
    }

    pub(crate) fn show(&self, text: impl Into<String>) {
        self.surface.display(DisplayEvent::new(text));
    }

    fn report(&self, err: &EngineError) {
        error!(err = err.to_string(), "Command failed.");
        self.surface.display(DisplayEvent::new(err.display_code()));
    }

    /// Emits the indicator state for the active loop: red when a function
    /// is active, orange when one is pending, green when it is available.
    fn refresh_leds(&self) {
        let id = self.session.active_loop;
        let entry = match self.registry.get(id) {
            Ok(entry) => entry,
            Err(_) => return,
        };

        let has_content = !entry.is_empty();
        let color = |active: bool, pending: bool, available: bool| {
            if active {
                LedColor::Red
            } else if pending {
                LedColor::Orange
            } else if available {
                LedColor::Green
            } else {
                LedColor::Off
            }
        };

        let states = [
            LedState {
                control: Control::Record,
                color: color(
                    entry.flags.recording,
                    self.scheduler.has_pending(id, OpClass::Record),
                    true,
                ),
            },
            LedState {
                control: Control::Overdub,
                color: color(
                    entry.flags.overdubbing,
                    self.scheduler.has_pending(id, OpClass::Overdub),
                    has_content,
                ),
            },
            LedState {
                control: Control::Multiply,
                color: color(
                    entry.flags.multiplying,
                    self.scheduler.has_pending(id, OpClass::Mode),
                    has_content,
                ),
            },
            LedState {
                control: Control::Insert,
                color: color(
                    entry.flags.inserting,
                    self.scheduler.has_pending(id, OpClass::Mode),
                    true,
                ),
            },
            LedState {
                control: Control::Mute,
                color: color(
                    entry.flags.muted,
                    self.scheduler.has_pending(id, OpClass::Mute),
                    has_content,
                ),
            },
            LedState {
                control: Control::Undo,
                color: color(false, false, self.undo.depth_of(id) > 0),
            },
            LedState {
                control: Control::NextLoop,
                color: color(
                    false,
                    self.scheduler.has_pending(id, OpClass::Switch),
                    self.session.loop_count > 1,
                ),
            },
        ];

        for state in states {
            self.surface.led(state);
        }
    }

    /// Invariants checked after every mutation in debug builds: the
    /// exclusive-mode rule per loop and memory conservation per session.
    fn assert_invariants(&self) {
        for entry in self.registry.iter() {
            debug_assert!(
                entry.flags.exclusion_holds(),
                "exclusive flags violated on loop {}",
                entry.id()
            );
        }
        debug_assert!(
            self.registry.total_memory_used()
                <= self.session.total_memory_seconds + crate::memory::BUDGET_EPSILON,
            "memory conservation violated: {} > {}",
            self.registry.total_memory_used(),
            self.session.total_memory_seconds
        );
    }
}
