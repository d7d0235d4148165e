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

use tracing::debug;

use crate::session::{Loop, LoopFlags, LoopId, OverdubLayer};

/// A deep, immutable copy of one loop's restorable state, captured before a
/// destructive mutation. Timeline state (the playback origin) is
/// deliberately excluded: undo restores content, not position.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoSnapshot {
    pub loop_id: LoopId,
    /// The operation that triggered the capture.
    pub reason: &'static str,
    pub length_seconds: f64,
    pub cycle_count: u32,
    pub start_offset: f64,
    pub flags: LoopFlags,
    pub layers: Vec<OverdubLayer>,
}

impl UndoSnapshot {
    /// Captures the loop's current state.
    pub fn capture(entry: &Loop, reason: &'static str) -> UndoSnapshot {
        UndoSnapshot {
            loop_id: entry.id(),
            reason,
            length_seconds: entry.length_seconds,
            cycle_count: entry.cycle_count,
            start_offset: entry.start_offset,
            flags: entry.flags,
            layers: entry.layers.clone(),
        }
    }
}

/// Bounded per-loop undo stacks plus the legacy whole-session snapshot that
/// backs them up when a stack runs dry.
pub struct UndoManager {
    depth: usize,
    stacks: HashMap<LoopId, Vec<UndoSnapshot>>,
    legacy: Option<HashMap<LoopId, UndoSnapshot>>,
}

impl UndoManager {
    /// Creates a manager with the given per-loop stack depth.
    pub fn new(depth: usize) -> UndoManager {
        UndoManager {
            depth,
            stacks: HashMap::new(),
            legacy: None,
        }
    }

    /// Pushes a snapshot for the loop, dropping the oldest entry past the
    /// configured depth.
    pub fn snapshot(&mut self, entry: &Loop, reason: &'static str) {
        let stack = self.stacks.entry(entry.id()).or_default();
        stack.push(UndoSnapshot::capture(entry, reason));
        if stack.len() > self.depth {
            stack.remove(0);
        }
        debug!(
            loop_id = entry.id().number(),
            reason = reason,
            depth = stack.len(),
            "Captured undo snapshot."
        );
    }

    /// Pops the most recent snapshot for the loop. Falls back to the legacy
    /// session snapshot when the stack is empty.
    pub fn undo(&mut self, id: LoopId) -> Option<UndoSnapshot> {
        if let Some(snapshot) = self.stacks.get_mut(&id).and_then(|stack| stack.pop()) {
            return Some(snapshot);
        }
        self.legacy.as_mut().and_then(|legacy| legacy.remove(&id))
    }

    /// Puts a snapshot back on top of its loop's stack. Used when a popped
    /// snapshot could not be restored (the allocator refused the grant) so
    /// the history is not lost.
    pub fn push(&mut self, snapshot: UndoSnapshot) {
        self.stacks
            .entry(snapshot.loop_id)
            .or_default()
            .push(snapshot);
    }

    /// Captures the legacy whole-session snapshot at the start of a user
    /// operation, replacing the previous one.
    pub fn begin_operation<'a>(&mut self, loops: impl Iterator<Item = &'a Loop>) {
        self.legacy = Some(
            loops
                .map(|entry| (entry.id(), UndoSnapshot::capture(entry, "session")))
                .collect(),
        );
    }

    /// The number of snapshots currently held for the loop.
    pub fn depth_of(&self, id: LoopId) -> usize {
        self.stacks.get(&id).map(|stack| stack.len()).unwrap_or(0)
    }

    /// Drops all history for one loop; used when its slot is destroyed.
    pub fn clear_loop(&mut self, id: LoopId) {
        self.stacks.remove(&id);
        if let Some(legacy) = self.legacy.as_mut() {
            legacy.remove(&id);
        }
    }
}

#[cfg(test)]
mod test {
    use crate::session::{Loop, LoopId};

    use super::UndoManager;

    fn loop_with_length(id: usize, length: f64) -> Loop {
        let mut entry = Loop::empty(LoopId::new(id));
        entry.length_seconds = length;
        entry.cycle_count = 1;
        entry.memory_used_seconds = length;
        entry.push_layer(length);
        entry
    }

    #[test]
    fn test_lifo_order() {
        let mut undo = UndoManager::new(4);
        let entry = loop_with_length(1, 2.0);
        undo.snapshot(&entry, "record");

        let mut longer = entry.clone();
        longer.length_seconds = 4.0;
        undo.snapshot(&longer, "multiply");

        assert_eq!(4.0, undo.undo(LoopId::new(1)).unwrap().length_seconds);
        assert_eq!(2.0, undo.undo(LoopId::new(1)).unwrap().length_seconds);
        assert!(undo.undo(LoopId::new(1)).is_none());
    }

    #[test]
    fn test_depth_bound_drops_oldest() {
        let mut undo = UndoManager::new(2);
        for length in [1.0, 2.0, 3.0] {
            undo.snapshot(&loop_with_length(1, length), "overdub");
        }

        assert_eq!(2, undo.depth_of(LoopId::new(1)));
        assert_eq!(3.0, undo.undo(LoopId::new(1)).unwrap().length_seconds);
        assert_eq!(2.0, undo.undo(LoopId::new(1)).unwrap().length_seconds);
        // The oldest snapshot was dropped at capture time.
        assert!(undo.undo(LoopId::new(1)).is_none());
    }

    #[test]
    fn test_legacy_fallback_consumed_once() {
        let mut undo = UndoManager::new(4);
        let loops = vec![loop_with_length(1, 2.0), loop_with_length(2, 3.0)];
        undo.begin_operation(loops.iter());

        let snapshot = undo.undo(LoopId::new(1)).expect("legacy fallback");
        assert_eq!("session", snapshot.reason);
        assert_eq!(2.0, snapshot.length_seconds);
        assert!(undo.undo(LoopId::new(1)).is_none());

        // The other loop's legacy entry is still there.
        assert!(undo.undo(LoopId::new(2)).is_some());
    }

    #[test]
    fn test_clear_loop_scopes_to_one_loop() {
        let mut undo = UndoManager::new(4);
        undo.snapshot(&loop_with_length(1, 2.0), "record");
        undo.snapshot(&loop_with_length(2, 3.0), "record");

        undo.clear_loop(LoopId::new(1));
        assert!(undo.undo(LoopId::new(1)).is_none());
        assert!(undo.undo(LoopId::new(2)).is_some());
    }
}
