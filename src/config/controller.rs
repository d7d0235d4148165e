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
use std::error::Error;

use midly::live::LiveEvent;
use serde::Deserialize;

use super::midi::{self, ToMidiEvent};

/// Allows users to specify various controllers.
#[derive(Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Controller {
    Keyboard,
    Midi(MidiController),
}

/// The configuration that maps MIDI events to looper actions. Inbound
/// program changes always switch loops and need no mapping here.
#[derive(Deserialize, Clone)]
pub struct MidiController {
    /// The MIDI event that toggles recording on the active loop.
    record: midi::Event,
    /// The MIDI event that toggles overdubbing on the active loop.
    overdub: midi::Event,
    /// The MIDI event that toggles multiply on the active loop.
    multiply: midi::Event,
    /// The MIDI event that toggles insert on the active loop.
    insert: midi::Event,
    /// The MIDI event that toggles mute on the active loop.
    mute: midi::Event,
    /// The MIDI event that undoes the last operation on the active loop.
    undo: midi::Event,
    /// The MIDI event that moves to the next loop slot.
    next_loop: midi::Event,
    /// The MIDI event that resets the active loop, if any.
    reset: Option<midi::Event>,
}

impl MidiController {
    #[cfg(test)]
    pub fn new(
        record: midi::Event,
        overdub: midi::Event,
        multiply: midi::Event,
        insert: midi::Event,
        mute: midi::Event,
        undo: midi::Event,
        next_loop: midi::Event,
        reset: Option<midi::Event>,
    ) -> MidiController {
        MidiController {
            record,
            overdub,
            multiply,
            insert,
            mute,
            undo,
            next_loop,
            reset,
        }
    }

    /// Gets the record event.
    pub fn record(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.record.to_midi_event()
    }

    /// Gets the overdub event.
    pub fn overdub(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.overdub.to_midi_event()
    }

    /// Gets the multiply event.
    pub fn multiply(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.multiply.to_midi_event()
    }

    /// Gets the insert event.
    pub fn insert(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.insert.to_midi_event()
    }

    /// Gets the mute event.
    pub fn mute(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.mute.to_midi_event()
    }

    /// Gets the undo event.
    pub fn undo(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.undo.to_midi_event()
    }

    /// Gets the next loop event.
    pub fn next_loop(&self) -> Result<LiveEvent<'static>, Box<dyn Error>> {
        self.next_loop.to_midi_event()
    }

    /// Gets the reset event.
    pub fn reset(&self) -> Result<Option<LiveEvent<'static>>, Box<dyn Error>> {
        match &self.reset {
            Some(event) => Ok(Some(event.to_midi_event()?)),
            None => Ok(None),
        }
    }
}
