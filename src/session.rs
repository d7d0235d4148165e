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
use std::fmt;

use serde::{Deserialize, Serialize};

/// The maximum number of loop slots a session can be sized to.
pub const MAX_LOOPS: usize = 16;

/// The valid range for subdivisions per cycle.
pub const SUBDIVISION_RANGE: std::ops::RangeInclusive<u8> = 2..=16;

/// A stable handle for one loop slot. Slots are numbered from 1, matching
/// the numbering on the front panel display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopId(usize);

impl LoopId {
    /// Creates a loop id. Ids are 1-based.
    pub fn new(id: usize) -> LoopId {
        LoopId(id)
    }

    /// The 1-based slot number.
    pub fn number(&self) -> usize {
        self.0
    }

    /// The 0-based index into the session's loop array. Slot 0 never
    /// exists; it wraps to an out-of-range index and fails lookup.
    pub fn index(&self) -> usize {
        self.0.wrapping_sub(1)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Policy determining whether and when a command is deferred to a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizeMode {
    #[default]
    Off,
    Cycle,
    Loop,
    Subdivision,
}

/// The deferral policy applied specifically to active-loop switching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchQuantize {
    #[default]
    Off,
    Cycle,
    Loop,
    /// Hold the switch until an explicit confirm command arrives.
    Confirm,
}

/// Whether a Multiply/Insert stop waits for the current cycle to finish or
/// takes effect exactly when issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    #[default]
    Rounded,
    Unrounded,
}

/// How the record button behaves on a loop that already has content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordMode {
    /// Re-recording over existing content is always allowed.
    #[default]
    Toggle,
    /// Re-recording is allowed, and the feedback setting in effect before
    /// the operation is restored once it completes.
    Safe,
    /// Recording only ever targets an empty loop.
    Sustain,
}

/// The mutually exclusive transport modes a loop can be in. Mute, Reverse
/// and HalfSpeed are orthogonal modifiers and not part of this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveMode {
    Recording,
    Overdubbing,
    Multiplying,
    Inserting,
    Substituting,
    Replacing,
}

impl ExclusiveMode {
    /// The operation name used in logs, displays and undo reasons.
    pub fn name(&self) -> &'static str {
        match self {
            ExclusiveMode::Recording => "record",
            ExclusiveMode::Overdubbing => "overdub",
            ExclusiveMode::Multiplying => "multiply",
            ExclusiveMode::Inserting => "insert",
            ExclusiveMode::Substituting => "substitute",
            ExclusiveMode::Replacing => "replace",
        }
    }
}

/// Per-loop transport flags. The exclusive set is modeled as individual
/// booleans rather than a single enum because the orthogonal modifiers
/// (mute/reverse/half-speed) can combine with any of them, but at most one
/// of the exclusive flags may be set at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopFlags {
    pub recording: bool,
    pub overdubbing: bool,
    pub multiplying: bool,
    pub inserting: bool,
    pub substituting: bool,
    pub replacing: bool,
    pub muted: bool,
    pub reversed: bool,
    pub half_speed: bool,
}

impl LoopFlags {
    /// Returns the exclusive mode currently active, if any.
    pub fn exclusive_mode(&self) -> Option<ExclusiveMode> {
        if self.recording {
            Some(ExclusiveMode::Recording)
        } else if self.overdubbing {
            Some(ExclusiveMode::Overdubbing)
        } else if self.multiplying {
            Some(ExclusiveMode::Multiplying)
        } else if self.inserting {
            Some(ExclusiveMode::Inserting)
        } else if self.substituting {
            Some(ExclusiveMode::Substituting)
        } else if self.replacing {
            Some(ExclusiveMode::Replacing)
        } else {
            None
        }
    }

    /// True if at most one of the exclusive flags is set. Checked after
    /// every transition in debug builds.
    pub fn exclusion_holds(&self) -> bool {
        [
            self.recording,
            self.overdubbing,
            self.multiplying,
            self.inserting,
            self.substituting,
            self.replacing,
        ]
        .iter()
        .filter(|flag| **flag)
        .count()
            <= 1
    }

    /// Sets the given exclusive mode, clearing the others.
    pub fn set_exclusive(&mut self, mode: ExclusiveMode) {
        self.clear_exclusive();
        match mode {
            ExclusiveMode::Recording => self.recording = true,
            ExclusiveMode::Overdubbing => self.overdubbing = true,
            ExclusiveMode::Multiplying => self.multiplying = true,
            ExclusiveMode::Inserting => self.inserting = true,
            ExclusiveMode::Substituting => self.substituting = true,
            ExclusiveMode::Replacing => self.replacing = true,
        }
    }

    /// Clears all exclusive flags, leaving the orthogonal modifiers alone.
    pub fn clear_exclusive(&mut self) {
        self.recording = false;
        self.overdubbing = false;
        self.multiplying = false;
        self.inserting = false;
        self.substituting = false;
        self.replacing = false;
    }
}

/// An opaque handle to an audio buffer owned by the audio engine. The
/// transport never inspects buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// One overdub pass blended onto a loop. Reference only; the samples live
/// in the audio engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OverdubLayer {
    /// The layer duration. Equals the loop length at creation time.
    pub duration_seconds: f64,
    /// Monotonically increasing creation order within the loop.
    pub ordinal: u32,
    /// The buffer handle, attached once the audio engine confirms capture.
    pub buffer: Option<BufferHandle>,
}

/// One recordable cyclic audio region.
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    id: LoopId,
    /// Current loop duration. Zero means the loop has no timing.
    pub length_seconds: f64,
    /// Number of repetitions established by Multiply/Insert.
    pub cycle_count: u32,
    /// Playback start point within the loop.
    pub start_offset: f64,
    pub flags: LoopFlags,
    /// Ordered overdub passes, oldest first.
    pub layers: Vec<OverdubLayer>,
    /// Seconds of the memory budget attributed to this loop. Equals
    /// `length_seconds` once audio content exists.
    pub memory_used_seconds: f64,
    /// Wall-clock time of the loop's last position-zero crossing. Timeline
    /// state, not content; excluded from undo snapshots.
    pub origin_seconds: f64,
    next_ordinal: u32,
}

impl Loop {
    /// Creates an empty loop for the given slot.
    pub fn empty(id: LoopId) -> Loop {
        Loop {
            id,
            length_seconds: 0.0,
            cycle_count: 0,
            start_offset: 0.0,
            flags: LoopFlags::default(),
            layers: Vec::new(),
            memory_used_seconds: 0.0,
            origin_seconds: 0.0,
            next_ordinal: 0,
        }
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    /// True if the loop has no established timing at all.
    pub fn is_empty(&self) -> bool {
        self.length_seconds == 0.0
    }

    /// True if the loop has audio content (as opposed to timing metadata
    /// alone, which a timing-only copy can establish).
    pub fn has_audio(&self) -> bool {
        self.memory_used_seconds > 0.0
    }

    /// The length of one cycle within the loop.
    pub fn cycle_seconds(&self) -> f64 {
        if self.cycle_count == 0 {
            self.length_seconds
        } else {
            self.length_seconds / self.cycle_count as f64
        }
    }

    /// Appends a new overdub layer and returns its ordinal.
    pub fn push_layer(&mut self, duration_seconds: f64) -> u32 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.layers.push(OverdubLayer {
            duration_seconds,
            ordinal,
            buffer: None,
        });
        ordinal
    }

    /// Returns the loop to its just-created state.
    pub fn clear(&mut self) {
        let id = self.id;
        *self = Loop::empty(id);
    }
}

/// Global configuration shared by all loops. Owned exclusively by the
/// engine; all reads and writes go through it rather than through global
/// state.
#[derive(Debug, Clone)]
pub struct Session {
    /// The number of loop slots sharing the memory budget.
    pub loop_count: usize,
    /// The fixed total duration budget across all slots.
    pub total_memory_seconds: f64,
    pub quantize: QuantizeMode,
    pub switch_quantize: SwitchQuantize,
    /// Subdivision boundary density within one cycle.
    pub subdivisions_per_cycle: u8,
    pub active_loop: LoopId,
    pub rounding: RoundingMode,
    pub record_mode: RecordMode,
    /// Loop feedback level, 0.0..=1.0.
    pub feedback: f64,
    /// Cycle length granted to Insert on an empty loop.
    pub default_cycle_seconds: f64,
    /// Undo stack depth per loop.
    pub undo_depth: usize,
    /// Bounded wait for audio engine completions.
    pub external_timeout_seconds: f64,
    /// Optional ceiling on any single loop, tightening the even share.
    pub max_loop_seconds: Option<f64>,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            loop_count: 1,
            // The amount of sample memory the classic hardware reports on
            // startup.
            total_memory_seconds: 198.0,
            quantize: QuantizeMode::Off,
            switch_quantize: SwitchQuantize::Off,
            subdivisions_per_cycle: 8,
            active_loop: LoopId::new(1),
            rounding: RoundingMode::Rounded,
            record_mode: RecordMode::Toggle,
            feedback: 1.0,
            default_cycle_seconds: 2.0,
            undo_depth: 4,
            external_timeout_seconds: 2.0,
            max_loop_seconds: None,
        }
    }
}

impl Session {
    /// The slot after the given one, wrapping around.
    pub fn next_loop(&self, id: LoopId) -> LoopId {
        if id.number() >= self.loop_count {
            LoopId::new(1)
        } else {
            LoopId::new(id.number() + 1)
        }
    }

    /// The slot before the given one, wrapping around.
    pub fn prev_loop(&self, id: LoopId) -> LoopId {
        if id.number() <= 1 {
            LoopId::new(self.loop_count)
        } else {
            LoopId::new(id.number() - 1)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exclusive_flags() {
        let mut flags = LoopFlags::default();
        assert!(flags.exclusion_holds());
        assert_eq!(None, flags.exclusive_mode());

        flags.set_exclusive(ExclusiveMode::Recording);
        assert!(flags.exclusion_holds());
        assert_eq!(Some(ExclusiveMode::Recording), flags.exclusive_mode());

        // Switching modes clears the previous one.
        flags.set_exclusive(ExclusiveMode::Multiplying);
        assert!(flags.exclusion_holds());
        assert_eq!(Some(ExclusiveMode::Multiplying), flags.exclusive_mode());
        assert!(!flags.recording);

        // Modifiers are untouched by exclusive transitions.
        flags.muted = true;
        flags.clear_exclusive();
        assert!(flags.muted);
        assert_eq!(None, flags.exclusive_mode());
    }

    #[test]
    fn test_loop_cycle_seconds() {
        let mut entry = Loop::empty(LoopId::new(1));
        entry.length_seconds = 6.0;
        entry.cycle_count = 3;
        assert_eq!(2.0, entry.cycle_seconds());

        entry.cycle_count = 0;
        assert_eq!(6.0, entry.cycle_seconds());
    }

    #[test]
    fn test_layer_ordinals_are_monotonic() {
        let mut entry = Loop::empty(LoopId::new(1));
        assert_eq!(0, entry.push_layer(2.0));
        assert_eq!(1, entry.push_layer(2.0));
        entry.layers.pop();
        // Ordinals never reuse, even after removal.
        assert_eq!(2, entry.push_layer(2.0));
    }

    #[test]
    fn test_session_neighbor_loops() {
        let session = Session {
            loop_count: 4,
            ..Session::default()
        };
        assert_eq!(LoopId::new(2), session.next_loop(LoopId::new(1)));
        assert_eq!(LoopId::new(1), session.next_loop(LoopId::new(4)));
        assert_eq!(LoopId::new(4), session.prev_loop(LoopId::new(1)));
        assert_eq!(LoopId::new(3), session.prev_loop(LoopId::new(4)));
    }
}
