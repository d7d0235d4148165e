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
use midly::{live::LiveEvent, MidiMessage};
use tracing::{error, info};

use crate::error::EngineError;
use crate::session::LoopId;

use super::{CopyMode, Engine, Outcome};

/// The channel loop-switch program changes go out on.
const PROGRAM_CHANGE_CHANNEL: u8 = 15;

impl Engine {
    /// Makes the given slot the active loop. Quantized deferral happens
    /// before this is reached; by here the switch is immediate.
    pub(crate) fn switch_loop(&mut self, target: LoopId, at: f64) -> Result<Outcome, EngineError> {
        self.registry.get(target)?;
        if target == self.session.active_loop {
            return Ok(Outcome::Applied);
        }

        let previous = self.session.active_loop;
        self.session.active_loop = target;

        // Entering a loop retriggers it from its start point.
        let entry = self.registry.get_mut(target)?;
        if !entry.is_empty() {
            entry.origin_seconds = at - entry.start_offset;
        }
        self.push_playback_params(target);
        self.emit_program_change(target);

        info!(
            from = previous.number(),
            to = target.number(),
            "Switched active loop."
        );
        self.show(format!("LP {}", target.number()));
        Ok(Outcome::Applied)
    }

    /// Releases switches held behind `SwitchQuantize::Confirm`.
    pub(crate) fn confirm_switch(&mut self, at: f64) -> Result<Outcome, EngineError> {
        let released = self.scheduler.confirm(self.session.active_loop);
        if released.is_empty() {
            info!("Nothing awaiting confirmation.");
            return Ok(Outcome::Applied);
        }

        let mut outcome = Outcome::Applied;
        for pending in released {
            outcome = self.apply(pending.command, at)?;
        }
        Ok(outcome)
    }

    /// Copies loop content between slots. Audio copies layer references,
    /// timing copies cycle metadata, full copies both.
    pub(crate) fn copy(
        &mut self,
        source: LoopId,
        target: LoopId,
        mode: CopyMode,
    ) -> Result<Outcome, EngineError> {
        if source == target {
            return Err(EngineError::InvalidTransition {
                loop_id: source,
                operation: "copy",
                reason: "source and target are the same loop",
            });
        }

        let (length, cycle_count) = {
            let src = self.registry.get(source)?;
            match mode {
                CopyMode::Audio | CopyMode::Full => {
                    if !src.has_audio() {
                        return Err(EngineError::SourceEmpty(source));
                    }
                }
                // Timing can be copied from a silent loop, but only if it
                // actually carries cycle metadata.
                CopyMode::Timing => {
                    if src.cycle_count == 0 || src.length_seconds == 0.0 {
                        return Err(EngineError::SourceEmpty(source));
                    }
                }
            }
            (src.length_seconds, src.cycle_count)
        };

        let tgt = self.registry.get(target)?;
        if let Some(active) = tgt.flags.exclusive_mode() {
            return Err(EngineError::InvalidTransition {
                loop_id: target,
                operation: "copy",
                reason: active.name(),
            });
        }
        if !tgt.is_empty() {
            self.undo.snapshot(tgt, "copy");
        }

        match mode {
            CopyMode::Audio => self.registry.copy_audio(source, target, false)?,
            CopyMode::Full => self.registry.copy_audio(source, target, true)?,
            CopyMode::Timing => self.registry.set_timing(target, length, cycle_count)?,
        }

        info!(
            source = source.number(),
            target = target.number(),
            mode = format!("{:?}", mode),
            "Copied loop."
        );
        self.show("COPY");
        Ok(Outcome::Applied)
    }

    /// Marks whether the engine holds an external sync lock. A general
    /// reset leaves it alone.
    pub fn set_sync_locked(&mut self, locked: bool) {
        self.sync_locked = locked;
    }

    pub fn sync_locked(&self) -> bool {
        self.sync_locked
    }

    /// Announces the active loop to the outside world as a program change.
    fn emit_program_change(&self, target: LoopId) {
        if let Some(device) = &self.midi_device {
            let event = LiveEvent::Midi {
                channel: PROGRAM_CHANGE_CHANNEL.into(),
                message: MidiMessage::ProgramChange {
                    program: ((target.number() - 1) as u8).into(),
                },
            };
            if let Err(e) = device.emit(event) {
                error!(err = e.as_ref(), "Error emitting program change.");
            }
        }
    }
}
