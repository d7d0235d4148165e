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
use tracing::info;

use crate::error::EngineError;
use crate::memory::MemoryAllocator;
use crate::session::{Loop, LoopId, OverdubLayer};

/// Owns the session's loop entities and is their sole mutator. Every
/// length-changing mutation asks the allocator first; a denied grant leaves
/// the loop untouched.
pub struct LoopRegistry {
    loops: Vec<Loop>,
    allocator: MemoryAllocator,
}

impl LoopRegistry {
    /// Creates a registry with `loop_count` empty loops sharing the budget.
    pub fn new(
        loop_count: usize,
        total_memory_seconds: f64,
        max_loop_seconds: Option<f64>,
    ) -> LoopRegistry {
        LoopRegistry {
            loops: (1..=loop_count).map(|n| Loop::empty(LoopId::new(n))).collect(),
            allocator: MemoryAllocator::new(total_memory_seconds, loop_count, max_loop_seconds),
        }
    }

    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter()
    }

    pub fn get(&self, id: LoopId) -> Result<&Loop, EngineError> {
        self.loops
            .get(id.index())
            .ok_or(EngineError::UnknownLoop(id))
    }

    pub fn get_mut(&mut self, id: LoopId) -> Result<&mut Loop, EngineError> {
        self.loops
            .get_mut(id.index())
            .ok_or(EngineError::UnknownLoop(id))
    }

    /// Sum of memory attributed to loop content across all slots.
    pub fn total_memory_used(&self) -> f64 {
        self.loops.iter().map(|l| l.memory_used_seconds).sum()
    }

    /// Fixes a loop's length after a completed Record. Allocates first; on
    /// success the loop holds one cycle of the recorded length and starts
    /// playback at the given origin.
    pub fn set_recorded_length(
        &mut self,
        id: LoopId,
        length_seconds: f64,
        origin_seconds: f64,
    ) -> Result<(), EngineError> {
        self.get(id)?;
        self.allocator.try_allocate(id, length_seconds)?;

        let entry = self.get_mut(id)?;
        entry.length_seconds = length_seconds;
        entry.cycle_count = 1;
        entry.start_offset = 0.0;
        entry.memory_used_seconds = length_seconds;
        entry.origin_seconds = origin_seconds;
        entry.layers.clear();
        entry.push_layer(length_seconds);
        Ok(())
    }

    /// Recomputes a loop's length from a base cycle length and cycle count
    /// after Multiply/Insert completes.
    pub fn rebuild_length(
        &mut self,
        id: LoopId,
        cycle_seconds: f64,
        cycle_count: u32,
    ) -> Result<(), EngineError> {
        let length = cycle_seconds * cycle_count as f64;
        self.resize_content(id, length, cycle_count)
    }

    /// Sets a loop's content length directly (unrounded completions produce
    /// fractional cycle multiples).
    pub fn resize_content(
        &mut self,
        id: LoopId,
        length_seconds: f64,
        cycle_count: u32,
    ) -> Result<(), EngineError> {
        self.get(id)?;
        self.allocator.try_allocate(id, length_seconds)?;

        let entry = self.get_mut(id)?;
        entry.length_seconds = length_seconds;
        entry.cycle_count = cycle_count;
        entry.memory_used_seconds = length_seconds;
        Ok(())
    }

    /// Copies timing metadata onto a loop, leaving its audio untouched. A
    /// target that has audio is reallocated to the new length first.
    pub fn set_timing(
        &mut self,
        id: LoopId,
        length_seconds: f64,
        cycle_count: u32,
    ) -> Result<(), EngineError> {
        let has_audio = self.get(id)?.has_audio();
        if has_audio {
            self.allocator.try_allocate(id, length_seconds)?;
        }

        let entry = self.get_mut(id)?;
        entry.length_seconds = length_seconds;
        entry.cycle_count = cycle_count;
        if has_audio {
            entry.memory_used_seconds = length_seconds;
        }
        Ok(())
    }

    /// Copies audio content (layer references) from one loop onto another.
    pub fn copy_audio(
        &mut self,
        source: LoopId,
        target: LoopId,
        with_timing: bool,
    ) -> Result<(), EngineError> {
        let (length, cycle_count, layers) = {
            let src = self.get(source)?;
            (src.length_seconds, src.cycle_count, src.layers.clone())
        };
        self.get(target)?;
        self.allocator.try_allocate(target, length)?;

        let entry = self.get_mut(target)?;
        entry.length_seconds = length;
        entry.cycle_count = if with_timing { cycle_count } else { 1 };
        entry.start_offset = 0.0;
        entry.memory_used_seconds = length;
        entry.layers = layers;
        Ok(())
    }

    /// Appends an overdub layer to a loop. Overdubs do not change length,
    /// so the existing grant already covers them.
    pub fn append_layer(&mut self, id: LoopId) -> Result<u32, EngineError> {
        let entry = self.get_mut(id)?;
        let duration = entry.length_seconds;
        Ok(entry.push_layer(duration))
    }

    /// Removes the most recent overdub layer.
    pub fn remove_last_layer(&mut self, id: LoopId) -> Result<OverdubLayer, EngineError> {
        let entry = self.get_mut(id)?;
        entry.layers.pop().ok_or(EngineError::InvalidTransition {
            loop_id: id,
            operation: "remove layer",
            reason: "no layers",
        })
    }

    /// Clears a loop back to empty and releases its memory grant.
    pub fn clear(&mut self, id: LoopId) -> Result<(), EngineError> {
        self.get_mut(id)?.clear();
        self.allocator.release(id);
        Ok(())
    }

    /// Restores a loop from an undo snapshot. The allocator is re-checked:
    /// restoring longer content than currently granted can fail, in which
    /// case the loop is left unchanged.
    pub fn restore(
        &mut self,
        id: LoopId,
        length_seconds: f64,
        cycle_count: u32,
        start_offset: f64,
        flags: crate::session::LoopFlags,
        layers: Vec<OverdubLayer>,
    ) -> Result<(), EngineError> {
        self.get(id)?;
        let memory = if layers.is_empty() { 0.0 } else { length_seconds };
        if memory > 0.0 {
            self.allocator.try_allocate(id, memory)?;
        } else {
            self.allocator.release(id);
        }

        let entry = self.get_mut(id)?;
        entry.length_seconds = length_seconds;
        entry.cycle_count = cycle_count;
        entry.start_offset = start_offset;
        entry.flags = flags;
        entry.layers = layers;
        entry.memory_used_seconds = memory;
        Ok(())
    }

    /// Resizes the session to a new loop count. Existing content blocks a
    /// shrinking share unless forced; forcing clears the blocking loops.
    pub fn resize(&mut self, new_loop_count: usize, force: bool) -> Result<(), EngineError> {
        self.allocator.reconfigure(new_loop_count, force)?;

        // Any loop whose grant the allocator dropped gets cleared too.
        for entry in self.loops.iter_mut() {
            if entry.memory_used_seconds > 0.0 && self.allocator.allocated(entry.id()) == 0.0 {
                info!(loop_id = entry.id().number(), "Clearing loop on resize.");
                entry.clear();
            }
        }

        let old_count = self.loops.len();
        if new_loop_count < old_count {
            self.loops.truncate(new_loop_count);
        } else {
            for n in (old_count + 1)..=new_loop_count {
                self.loops.push(Loop::empty(LoopId::new(n)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::error::EngineError;
    use crate::session::LoopId;

    use super::LoopRegistry;

    #[test]
    fn test_record_allocates_and_seeds_base_layer() {
        let mut registry = LoopRegistry::new(4, 80.0, None);
        registry
            .set_recorded_length(LoopId::new(1), 2.0, 10.0)
            .unwrap();

        let entry = registry.get(LoopId::new(1)).unwrap();
        assert_eq!(2.0, entry.length_seconds);
        assert_eq!(1, entry.cycle_count);
        assert_eq!(2.0, entry.memory_used_seconds);
        assert_eq!(10.0, entry.origin_seconds);
        assert_eq!(1, entry.layers.len());
        assert_eq!(2.0, registry.allocator().allocated(LoopId::new(1)));
    }

    #[test]
    fn test_denied_grant_leaves_loop_unchanged() {
        let mut registry = LoopRegistry::new(4, 80.0, None);
        registry
            .set_recorded_length(LoopId::new(1), 2.0, 0.0)
            .unwrap();

        // 25s exceeds the 20s share.
        let denied = registry.rebuild_length(LoopId::new(1), 2.5, 10);
        assert!(matches!(
            denied,
            Err(EngineError::InsufficientMemory { .. })
        ));

        let entry = registry.get(LoopId::new(1)).unwrap();
        assert_eq!(2.0, entry.length_seconds);
        assert_eq!(1, entry.cycle_count);
    }

    #[test]
    fn test_layer_removal_reports_when_exhausted() {
        let mut registry = LoopRegistry::new(1, 80.0, None);
        registry
            .set_recorded_length(LoopId::new(1), 2.0, 0.0)
            .unwrap();
        registry.append_layer(LoopId::new(1)).unwrap();

        assert!(registry.remove_last_layer(LoopId::new(1)).is_ok());
        assert!(registry.remove_last_layer(LoopId::new(1)).is_ok());
        assert!(registry.remove_last_layer(LoopId::new(1)).is_err());
    }

    #[test]
    fn test_timing_copy_needs_no_grant_on_silent_loop() {
        let mut registry = LoopRegistry::new(2, 4.0, None);
        // The 2s share could never hold 6s of audio, but timing metadata
        // is free.
        registry.set_timing(LoopId::new(2), 6.0, 3).unwrap();

        let entry = registry.get(LoopId::new(2)).unwrap();
        assert_eq!(6.0, entry.length_seconds);
        assert_eq!(3, entry.cycle_count);
        assert_eq!(0.0, entry.memory_used_seconds);
        assert!(!entry.has_audio());
    }

    #[test]
    fn test_clear_releases_memory() {
        let mut registry = LoopRegistry::new(1, 80.0, None);
        registry
            .set_recorded_length(LoopId::new(1), 2.0, 0.0)
            .unwrap();
        registry.clear(LoopId::new(1)).unwrap();

        assert!(registry.get(LoopId::new(1)).unwrap().is_empty());
        assert_eq!(0.0, registry.allocator().allocated_total());
    }

    #[test]
    fn test_resize_clears_forced_loops() {
        let mut registry = LoopRegistry::new(2, 80.0, None);
        registry
            .set_recorded_length(LoopId::new(1), 30.0, 0.0)
            .unwrap();

        assert!(matches!(
            registry.resize(4, false),
            Err(EngineError::ActiveLoopsBlockResize { .. })
        ));
        assert!(registry.resize(4, true).is_ok());
        assert_eq!(4, registry.len());
        assert!(registry.get(LoopId::new(1)).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_loop() {
        let registry = LoopRegistry::new(2, 80.0, None);
        assert!(matches!(
            registry.get(LoopId::new(3)),
            Err(EngineError::UnknownLoop(_))
        ));
    }
}
