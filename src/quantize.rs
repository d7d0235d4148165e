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
use tracing::debug;

use crate::engine::Command;
use crate::session::LoopId;

/// Grouping of commands for the one-pending-per-class rule. Multiply,
/// Insert, Substitute and Replace contend for the same exclusive mode slot
/// and therefore share a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Record,
    Overdub,
    Mode,
    Mute,
    Reverse,
    Speed,
    Trigger,
    Switch,
}

impl OpClass {
    /// Toggle classes queue a second submission as the matched stop of a
    /// start/stop pair instead of replacing the start.
    fn is_toggle(&self) -> bool {
        matches!(self, OpClass::Record | OpClass::Overdub | OpClass::Mode)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpClass::Record => "record",
            OpClass::Overdub => "overdub",
            OpClass::Mode => "mode",
            OpClass::Mute => "mute",
            OpClass::Reverse => "reverse",
            OpClass::Speed => "speed",
            OpClass::Trigger => "trigger",
            OpClass::Switch => "switch",
        }
    }
}

/// When a deferred operation becomes eligible for release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// Released once the timeline reaches this instant.
    At(f64),
    /// Released only by an explicit confirm command.
    Confirm,
}

/// A deferred quantized intent. Waiting is represented as data; nothing in
/// the engine blocks on a boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    pub command: Command,
    pub loop_id: LoopId,
    pub class: OpClass,
    pub submitted_at: f64,
    pub gate: Gate,
}

/// How a submission landed in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// First pending entry of its class for the loop.
    Queued,
    /// Joined a pending start as the matched stop of a toggle pair.
    PairedStop,
    /// Replaced a previous same-class entry (last-writer-wins).
    Superseded,
}

/// Holds pending operations and hands back the ones whose gate has passed.
/// The engine's tick drives release; the scheduler never invokes anything
/// itself.
#[derive(Default)]
pub struct Scheduler {
    pending: Vec<Pending>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    /// Registers a deferred operation, applying the per-class pending rules.
    pub fn submit(
        &mut self,
        command: Command,
        loop_id: LoopId,
        class: OpClass,
        submitted_at: f64,
        gate: Gate,
    ) -> Submission {
        let entry = Pending {
            command,
            loop_id,
            class,
            submitted_at,
            gate,
        };

        let same_class: Vec<usize> = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.loop_id == loop_id && p.class == class)
            .map(|(i, _)| i)
            .collect();

        let submission = if same_class.is_empty() {
            self.pending.push(entry);
            Submission::Queued
        } else if class.is_toggle() && same_class.len() == 1 {
            self.pending.push(entry);
            Submission::PairedStop
        } else {
            // Replace the newest same-class entry: the stop half of a pair,
            // or the single pending entry for non-toggle classes.
            let newest = *same_class.last().expect("same_class is non-empty");
            self.pending[newest] = entry;
            Submission::Superseded
        };

        debug!(
            loop_id = loop_id.number(),
            class = class.name(),
            submission = ?submission,
            "Deferred operation."
        );
        submission
    }

    /// Removes and returns the operations whose release time has passed, in
    /// submission order. A small tolerance absorbs float error from the
    /// boundary arithmetic so a release never slips a whole tick.
    pub fn take_due(&mut self, now_seconds: f64) -> Vec<Pending> {
        let mut due = Vec::new();
        self.pending.retain(|entry| match entry.gate {
            Gate::At(at) if at <= now_seconds + 1e-9 => {
                due.push(entry.clone());
                false
            }
            _ => true,
        });
        due
    }

    /// Removes and returns the confirm-gated operations for a loop.
    pub fn confirm(&mut self, loop_id: LoopId) -> Vec<Pending> {
        let mut released = Vec::new();
        self.pending.retain(|entry| {
            if entry.loop_id == loop_id && entry.gate == Gate::Confirm {
                released.push(entry.clone());
                false
            } else {
                true
            }
        });
        released
    }

    /// Removes all pending operations for a loop without invoking them.
    pub fn cancel_loop(&mut self, loop_id: LoopId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|entry| entry.loop_id != loop_id);
        before - self.pending.len()
    }

    /// Removes every pending operation.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    pub fn has_pending(&self, loop_id: LoopId, class: OpClass) -> bool {
        self.pending
            .iter()
            .any(|entry| entry.loop_id == loop_id && entry.class == class)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::engine::Command;
    use crate::session::LoopId;

    use super::{Gate, OpClass, Scheduler, Submission};

    fn record(id: usize) -> Command {
        Command::Record(LoopId::new(id))
    }

    fn multiply(id: usize) -> Command {
        Command::Multiply(LoopId::new(id))
    }

    fn mute(id: usize) -> Command {
        Command::Mute(LoopId::new(id))
    }

    #[test]
    fn test_release_in_submission_order() {
        let mut scheduler = Scheduler::new();
        let one = LoopId::new(1);
        scheduler.submit(record(1), one, OpClass::Record, 1.0, Gate::At(4.0));
        scheduler.submit(record(1), one, OpClass::Record, 1.5, Gate::At(4.0));

        // Nothing is due before the boundary.
        assert!(scheduler.take_due(3.9).is_empty());

        let due = scheduler.take_due(4.0);
        assert_eq!(2, due.len());
        assert_eq!(1.0, due[0].submitted_at);
        assert_eq!(1.5, due[1].submitted_at);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_toggle_class_pairs_then_replaces_stop() {
        let mut scheduler = Scheduler::new();
        let one = LoopId::new(1);

        assert_eq!(
            Submission::Queued,
            scheduler.submit(multiply(1), one, OpClass::Mode, 1.0, Gate::At(4.0))
        );
        assert_eq!(
            Submission::PairedStop,
            scheduler.submit(multiply(1), one, OpClass::Mode, 1.5, Gate::At(4.0))
        );
        // A third press only moves the stop; the pair never grows.
        assert_eq!(
            Submission::Superseded,
            scheduler.submit(multiply(1), one, OpClass::Mode, 2.0, Gate::At(4.0))
        );
        assert_eq!(2, scheduler.take_due(4.0).len());
    }

    #[test]
    fn test_non_toggle_class_is_last_writer_wins() {
        let mut scheduler = Scheduler::new();
        let one = LoopId::new(1);

        assert_eq!(
            Submission::Queued,
            scheduler.submit(mute(1), one, OpClass::Mute, 1.0, Gate::At(2.0))
        );
        assert_eq!(
            Submission::Superseded,
            scheduler.submit(mute(1), one, OpClass::Mute, 1.2, Gate::At(2.0))
        );

        let due = scheduler.take_due(2.0);
        assert_eq!(1, due.len());
        assert_eq!(1.2, due[0].submitted_at);
    }

    #[test]
    fn test_classes_are_scoped_per_loop() {
        let mut scheduler = Scheduler::new();
        scheduler.submit(mute(1), LoopId::new(1), OpClass::Mute, 1.0, Gate::At(2.0));

        assert_eq!(
            Submission::Queued,
            scheduler.submit(mute(2), LoopId::new(2), OpClass::Mute, 1.0, Gate::At(2.0))
        );
        assert_eq!(2, scheduler.take_due(2.0).len());
    }

    #[test]
    fn test_cancel_loop_drops_without_invoking() {
        let mut scheduler = Scheduler::new();
        scheduler.submit(record(1), LoopId::new(1), OpClass::Record, 1.0, Gate::At(4.0));
        scheduler.submit(mute(2), LoopId::new(2), OpClass::Mute, 1.0, Gate::At(4.0));

        assert_eq!(1, scheduler.cancel_loop(LoopId::new(1)));
        let due = scheduler.take_due(10.0);
        assert_eq!(1, due.len());
        assert_eq!(LoopId::new(2), due[0].loop_id);
    }

    #[test]
    fn test_confirm_gate() {
        let mut scheduler = Scheduler::new();
        let two = LoopId::new(2);
        scheduler.submit(
            Command::SwitchLoop(two),
            two,
            OpClass::Switch,
            1.0,
            Gate::Confirm,
        );

        // Time never releases a confirm-gated entry.
        assert!(scheduler.take_due(100.0).is_empty());
        assert_eq!(1, scheduler.confirm(two).len());
        assert!(scheduler.is_empty());
    }
}
