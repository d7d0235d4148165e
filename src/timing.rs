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
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::session::Loop;

/// Tolerance when deciding whether the current instant already sits on a
/// boundary. A released operation can land a few ulps on either side of
/// its computed boundary; a microsecond is far above float noise and far
/// below any musical grid.
const BOUNDARY_EPSILON: f64 = 1e-6;

/// The boundary grids an operation can be quantized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Cycle,
    Loop,
    Subdivision,
}

/// A monotonic time source. The engine only ever reads time through this
/// trait so tests can drive it by hand.
pub trait TimeSource: Send + Sync {
    /// Monotonic time since the source was created.
    fn now(&self) -> Duration;
}

/// The production time source, anchored to an [`Instant`].
pub struct Monotonic {
    start: Instant,
}

impl Monotonic {
    pub fn new() -> Monotonic {
        Monotonic {
            start: Instant::now(),
        }
    }
}

impl TimeSource for Monotonic {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Derives loop-relative positions and boundary distances from the time
/// source. Pure queries; holds no mutable state of its own.
#[derive(Clone)]
pub struct Timeline {
    source: Arc<dyn TimeSource>,
}

impl Timeline {
    pub fn new(source: Arc<dyn TimeSource>) -> Timeline {
        Timeline { source }
    }

    /// The current time in seconds.
    pub fn now_seconds(&self) -> f64 {
        self.source.now().as_secs_f64()
    }

    /// The playback position within the loop, `0 <= p < length`. An empty
    /// loop is always at position zero.
    pub fn position_in_loop(&self, entry: &Loop) -> f64 {
        self.position_in_loop_at(entry, self.now_seconds())
    }

    /// As [`position_in_loop`](Self::position_in_loop) at an explicit time.
    pub fn position_in_loop_at(&self, entry: &Loop, at_seconds: f64) -> f64 {
        if entry.is_empty() {
            return 0.0;
        }
        (at_seconds - entry.origin_seconds).rem_euclid(entry.length_seconds)
    }

    /// The playback position within the current cycle.
    pub fn position_in_cycle(&self, entry: &Loop) -> f64 {
        if entry.is_empty() {
            return 0.0;
        }
        let position = self.position_in_loop(entry);
        position.rem_euclid(entry.cycle_seconds())
    }

    /// Time until the next boundary of the given kind, from the given
    /// instant. Returns zero if the instant already sits on a boundary or
    /// the loop is empty (immediate release).
    pub fn time_to_next_boundary(
        &self,
        entry: &Loop,
        kind: BoundaryKind,
        subdivisions_per_cycle: u8,
        at_seconds: f64,
    ) -> f64 {
        if entry.is_empty() {
            return 0.0;
        }

        let grid = match kind {
            BoundaryKind::Loop => entry.length_seconds,
            BoundaryKind::Cycle => entry.cycle_seconds(),
            BoundaryKind::Subdivision => {
                let cycles = entry.cycle_count.max(1) as f64;
                entry.length_seconds / (cycles * subdivisions_per_cycle as f64)
            }
        };

        let elapsed = at_seconds - entry.origin_seconds;
        grid_distance(elapsed, grid)
    }
}

/// Distance from `elapsed` to the next multiple of `grid`. An instant
/// within tolerance of a multiple (on either side) is on the boundary.
pub(crate) fn grid_distance(elapsed: f64, grid: f64) -> f64 {
    let steps = (elapsed / grid).round();
    if (elapsed - steps * grid).abs() < BOUNDARY_EPSILON {
        return 0.0;
    }
    let next = grid * (elapsed / grid).ceil();
    (next - elapsed).max(0.0)
}

pub mod mock {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::TimeSource;

    /// A manually driven time source for deterministic tests.
    pub struct Clock {
        now: Mutex<Duration>,
    }

    impl Clock {
        pub fn new() -> Clock {
            Clock {
                now: Mutex::new(Duration::ZERO),
            }
        }

        /// Moves time forward.
        pub fn advance(&self, delta: Duration) {
            *self.now.lock() += delta;
        }

        /// Jumps time to an absolute value.
        pub fn set(&self, to: Duration) {
            *self.now.lock() = to;
        }
    }

    impl TimeSource for Clock {
        fn now(&self) -> Duration {
            *self.now.lock()
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::session::{Loop, LoopId};

    use super::{mock, BoundaryKind, Timeline};

    fn playing_loop(length: f64, cycles: u32, origin: f64) -> Loop {
        let mut entry = Loop::empty(LoopId::new(1));
        entry.length_seconds = length;
        entry.cycle_count = cycles;
        entry.memory_used_seconds = length;
        entry.origin_seconds = origin;
        entry
    }

    #[test]
    fn test_positions() {
        let clock = Arc::new(mock::Clock::new());
        let timeline = Timeline::new(clock.clone());
        let entry = playing_loop(4.0, 2, 0.0);

        clock.set(Duration::from_secs_f64(5.5));
        assert!((timeline.position_in_loop(&entry) - 1.5).abs() < 1e-9);
        // Cycle length is 2.0, so 5.5s is 1.5s into the third cycle pass.
        assert!((timeline.position_in_cycle(&entry) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_loop_is_immediate() {
        let clock = Arc::new(mock::Clock::new());
        let timeline = Timeline::new(clock.clone());
        let entry = Loop::empty(LoopId::new(1));

        clock.set(Duration::from_secs(3));
        assert_eq!(0.0, timeline.position_in_loop(&entry));
        for kind in [
            BoundaryKind::Cycle,
            BoundaryKind::Loop,
            BoundaryKind::Subdivision,
        ] {
            assert_eq!(0.0, timeline.time_to_next_boundary(&entry, kind, 8, 3.0));
        }
    }

    #[test]
    fn test_cycle_boundary_distance() {
        let clock = Arc::new(mock::Clock::new());
        let timeline = Timeline::new(clock);
        let entry = playing_loop(4.0, 1, 0.0);

        // Submitted at t=1.0 on a 4s cycle: boundary at 4.0.
        let distance = timeline.time_to_next_boundary(&entry, BoundaryKind::Cycle, 8, 1.0);
        assert!((distance - 3.0).abs() < 1e-9);

        // Exactly on the boundary releases immediately, never a full grid
        // period later.
        let distance = timeline.time_to_next_boundary(&entry, BoundaryKind::Cycle, 8, 4.0);
        assert_eq!(0.0, distance);
    }

    #[test]
    fn test_subdivision_grid() {
        let clock = Arc::new(mock::Clock::new());
        let timeline = Timeline::new(clock);
        // Length 8, 2 cycles, 4 subdivisions per cycle: grid of 1s.
        let entry = playing_loop(8.0, 2, 0.0);

        let distance = timeline.time_to_next_boundary(&entry, BoundaryKind::Subdivision, 4, 2.25);
        assert!((distance - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_origin_offsets_boundaries() {
        let clock = Arc::new(mock::Clock::new());
        let timeline = Timeline::new(clock);
        let entry = playing_loop(4.0, 1, 1.0);

        // Loop started at t=1.0, so loop boundaries fall at 5.0, 9.0, ...
        let distance = timeline.time_to_next_boundary(&entry, BoundaryKind::Loop, 8, 6.0);
        assert!((distance - 3.0).abs() < 1e-9);
    }
}
