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

use crate::error::EngineError;
use crate::session::LoopId;

/// Tolerance for budget comparisons. Loop lengths are derived from clock
/// arithmetic, so grants can land within a few ulps of the ceiling.
pub const BUDGET_EPSILON: f64 = 1e-9;

/// Partitions the fixed sample-memory budget across the configured loop
/// slots. Grants are whole-loop: a new grant for a slot atomically replaces
/// the previous one, so callers never observe a slot mid-resize.
#[derive(Debug, Clone)]
pub struct MemoryAllocator {
    total_seconds: f64,
    /// Even share of the budget per slot, recomputed on reconfigure.
    share_seconds: f64,
    /// Optional configured ceiling, tightening the share.
    max_loop_seconds: Option<f64>,
    allocations: HashMap<LoopId, f64>,
}

impl MemoryAllocator {
    /// Creates an allocator over the given budget, evenly shared across
    /// `loop_count` slots.
    pub fn new(total_seconds: f64, loop_count: usize, max_loop_seconds: Option<f64>) -> MemoryAllocator {
        MemoryAllocator {
            total_seconds,
            share_seconds: total_seconds / loop_count as f64,
            max_loop_seconds,
            allocations: HashMap::new(),
        }
    }

    /// The seconds currently granted to the given slot.
    pub fn allocated(&self, id: LoopId) -> f64 {
        self.allocations.get(&id).copied().unwrap_or(0.0)
    }

    /// The sum of all grants.
    pub fn allocated_total(&self) -> f64 {
        self.allocations.values().sum()
    }

    /// The largest grant the given slot could currently receive.
    pub fn available(&self, id: LoopId) -> f64 {
        let budget_room = self.total_seconds - self.allocated_total() + self.allocated(id);
        budget_room.min(self.ceiling())
    }

    /// The per-slot grant ceiling.
    pub fn ceiling(&self) -> f64 {
        match self.max_loop_seconds {
            Some(max) => self.share_seconds.min(max),
            None => self.share_seconds,
        }
    }

    /// Grants `seconds` to the slot, replacing any prior grant. Fails
    /// without side effects if the grant would exceed the slot ceiling or
    /// the total budget.
    pub fn try_allocate(&mut self, id: LoopId, seconds: f64) -> Result<(), EngineError> {
        let available = self.available(id);
        if seconds > self.ceiling() + BUDGET_EPSILON || seconds > available + BUDGET_EPSILON {
            return Err(EngineError::InsufficientMemory {
                requested_seconds: seconds,
                available_seconds: available,
            });
        }

        self.allocations.insert(id, seconds);
        debug!(
            loop_id = id.number(),
            seconds = seconds,
            total = self.allocated_total(),
            "Granted memory."
        );
        self.check_invariant();
        Ok(())
    }

    /// Frees the slot's grant.
    pub fn release(&mut self, id: LoopId) {
        if self.allocations.remove(&id).is_some() {
            debug!(loop_id = id.number(), "Released memory.");
        }
        self.check_invariant();
    }

    /// Recomputes the even share for a new slot count. Fails with the set of
    /// blocking loops if any existing grant would exceed the new share,
    /// unless `force` is set, in which case the blocking grants are released
    /// (the caller is responsible for clearing those loops).
    pub fn reconfigure(&mut self, new_loop_count: usize, force: bool) -> Result<(), EngineError> {
        let new_share = self.total_seconds / new_loop_count as f64;
        let mut blocking: Vec<LoopId> = self
            .allocations
            .iter()
            .filter(|(id, seconds)| {
                **seconds > new_share + BUDGET_EPSILON || id.number() > new_loop_count
            })
            .map(|(id, _)| *id)
            .collect();
        blocking.sort();

        if !blocking.is_empty() {
            if !force {
                return Err(EngineError::ActiveLoopsBlockResize { blocking });
            }
            for id in blocking {
                self.allocations.remove(&id);
            }
        }

        self.share_seconds = new_share;
        self.check_invariant();
        Ok(())
    }

    /// The budget invariant: the sum of grants never exceeds the total.
    fn check_invariant(&self) {
        debug_assert!(
            self.allocated_total() <= self.total_seconds + BUDGET_EPSILON,
            "memory budget exceeded: {} > {}",
            self.allocated_total(),
            self.total_seconds
        );
    }
}

#[cfg(test)]
mod test {
    use crate::error::EngineError;
    use crate::session::LoopId;

    use super::MemoryAllocator;

    #[test]
    fn test_even_share_is_the_ceiling() {
        // An 80s budget across 4 slots caps each slot at 20s.
        let mut allocator = MemoryAllocator::new(80.0, 4, None);
        assert_eq!(20.0, allocator.ceiling());

        assert!(allocator.try_allocate(LoopId::new(1), 20.0).is_ok());
        let denied = allocator.try_allocate(LoopId::new(2), 25.0);
        assert!(matches!(
            denied,
            Err(EngineError::InsufficientMemory { .. })
        ));
        // The failed grant left nothing behind.
        assert_eq!(0.0, allocator.allocated(LoopId::new(2)));
    }

    #[test]
    fn test_grants_replace_atomically() {
        let mut allocator = MemoryAllocator::new(80.0, 4, None);
        allocator.try_allocate(LoopId::new(1), 10.0).unwrap();
        allocator.try_allocate(LoopId::new(1), 15.0).unwrap();
        assert_eq!(15.0, allocator.allocated(LoopId::new(1)));
        assert_eq!(15.0, allocator.allocated_total());
    }

    #[test]
    fn test_configured_ceiling_tightens_share() {
        let mut allocator = MemoryAllocator::new(80.0, 2, Some(10.0));
        assert_eq!(10.0, allocator.ceiling());
        assert!(allocator.try_allocate(LoopId::new(1), 12.0).is_err());
        assert!(allocator.try_allocate(LoopId::new(1), 10.0).is_ok());
    }

    #[test]
    fn test_release() {
        let mut allocator = MemoryAllocator::new(80.0, 4, None);
        allocator.try_allocate(LoopId::new(1), 20.0).unwrap();
        allocator.release(LoopId::new(1));
        assert_eq!(0.0, allocator.allocated_total());
    }

    #[test]
    fn test_reconfigure_blocks_on_active_loops() {
        let mut allocator = MemoryAllocator::new(80.0, 2, None);
        allocator.try_allocate(LoopId::new(1), 30.0).unwrap();

        // 80/4 = 20s per slot, less than the 30s already granted.
        let denied = allocator.reconfigure(4, false);
        match denied {
            Err(EngineError::ActiveLoopsBlockResize { blocking }) => {
                assert_eq!(vec![LoopId::new(1)], blocking);
            }
            other => panic!("expected ActiveLoopsBlockResize, got {:?}", other),
        }
        // The failed reconfigure left the share untouched.
        assert_eq!(40.0, allocator.ceiling());

        // Forcing clears the blocking grant.
        assert!(allocator.reconfigure(4, true).is_ok());
        assert_eq!(0.0, allocator.allocated(LoopId::new(1)));
        assert_eq!(20.0, allocator.ceiling());
    }

    #[test]
    fn test_reconfigure_drops_out_of_range_slots() {
        let mut allocator = MemoryAllocator::new(80.0, 4, None);
        allocator.try_allocate(LoopId::new(4), 10.0).unwrap();

        let denied = allocator.reconfigure(2, false);
        assert!(matches!(
            denied,
            Err(EngineError::ActiveLoopsBlockResize { .. })
        ));
        assert!(allocator.reconfigure(2, true).is_ok());
        assert_eq!(0.0, allocator.allocated(LoopId::new(4)));
    }
}
