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
use std::{error::Error, io, sync::Arc};

use midly::{live::LiveEvent, MidiMessage};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, span, Level};

use crate::{config, midi::Device, session::LoopId};

use super::Action;

/// A controller that drives the looper using MIDI. Configured events map to
/// panel actions; inbound program changes always switch loops, mirroring
/// the program changes the engine emits when switching.
pub struct Driver {
    /// The MIDI device.
    midi_device: Arc<dyn Device>,
    /// The MIDI event that toggles recording.
    record: LiveEvent<'static>,
    /// The MIDI event that toggles overdubbing.
    overdub: LiveEvent<'static>,
    /// The MIDI event that toggles multiply.
    multiply: LiveEvent<'static>,
    /// The MIDI event that toggles insert.
    insert: LiveEvent<'static>,
    /// The MIDI event that toggles mute.
    mute: LiveEvent<'static>,
    /// The MIDI event that undoes the last operation.
    undo: LiveEvent<'static>,
    /// The MIDI event that moves to the next loop.
    next_loop: LiveEvent<'static>,
    /// The MIDI event that resets the active loop, if configured.
    reset: Option<LiveEvent<'static>>,
}

impl Driver {
    pub fn new(
        config: config::MidiController,
        midi_device: Arc<dyn Device>,
    ) -> Result<Arc<Self>, Box<dyn Error>> {
        Ok(Arc::new(Driver {
            midi_device,
            record: config.record()?,
            overdub: config.overdub()?,
            multiply: config.multiply()?,
            insert: config.insert()?,
            mute: config.mute()?,
            undo: config.undo()?,
            next_loop: config.next_loop()?,
            reset: config.reset()?,
        }))
    }
}

impl super::Driver for Driver {
    fn monitor_actions(&self, actions_tx: mpsc::Sender<Action>) -> JoinHandle<Result<(), io::Error>> {
        let (midi_events_tx, mut midi_events_rx) = mpsc::channel::<Vec<u8>>(10);
        let device = self.midi_device.clone();
        let record = self.record;
        let overdub = self.overdub;
        let multiply = self.multiply;
        let insert = self.insert;
        let mute = self.mute;
        let undo = self.undo;
        let next_loop = self.next_loop;
        let reset = self.reset;

        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "MIDI driver");
            let _enter = span.enter();

            info!("MIDI driver started.");

            if let Err(e) = device
                .watch_events(midi_events_tx)
                .map_err(|e| io::Error::other(e.to_string()))
            {
                error!(err = e.to_string(), "Error watching MIDI events");
            }
        });

        let device = self.midi_device.clone();
        tokio::spawn(async move {
            loop {
                let raw_event = match midi_events_rx.recv().await {
                    Some(raw_event) => raw_event,
                    None => {
                        info!("MIDI watcher closed.");
                        device.stop_watch_events();
                        return Ok(());
                    }
                };

                let event = match LiveEvent::parse(&raw_event) {
                    Ok(event) => event,
                    Err(e) => {
                        error!(err = format!("{:?}", e), "Error parsing event.");
                        continue;
                    }
                };

                let action = if event == record {
                    Some(Action::Record)
                } else if event == overdub {
                    Some(Action::Overdub)
                } else if event == multiply {
                    Some(Action::Multiply)
                } else if event == insert {
                    Some(Action::Insert)
                } else if event == mute {
                    Some(Action::Mute)
                } else if event == undo {
                    Some(Action::Undo)
                } else if event == next_loop {
                    Some(Action::NextLoop)
                } else if Some(event) == reset {
                    Some(Action::Reset)
                } else if let LiveEvent::Midi {
                    message: MidiMessage::ProgramChange { program },
                    ..
                } = event
                {
                    Some(Action::SwitchLoop(LoopId::new(
                        program.as_int() as usize + 1,
                    )))
                } else {
                    None
                };

                if let Some(action) = action {
                    if let Err(e) = actions_tx.send(action).await {
                        error!(err = e.to_string(), "Error sending action.");
                        return Ok(());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, sync::Arc};

    use tokio::sync::mpsc;

    use crate::{
        audio,
        config::{self, midi::ToMidiEvent, MidiController},
        controller::Controller,
        display,
        engine::Engine,
        midi::{self, Device},
        session::Session,
        testutil::eventually,
        timing::{Monotonic, Timeline},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn test_midi_controller() -> Result<(), Box<dyn Error>> {
        // Set up all of the MIDI events and the MIDI controller driver.
        let record_event = config::midi::note_on(16, 0, 127);
        let overdub_event = config::midi::note_on(16, 1, 127);
        let multiply_event = config::midi::note_on(16, 2, 127);
        let insert_event = config::midi::note_on(16, 3, 127);
        let mute_event = config::midi::note_on(16, 4, 127);
        let undo_event = config::midi::note_on(16, 5, 127);
        let next_loop_event = config::midi::note_on(16, 6, 127);

        let unrecognized_event = midly::live::LiveEvent::Midi {
            channel: 15.into(),
            message: midly::MidiMessage::NoteOn {
                key: 99.into(),
                vel: 127.into(),
            },
        };

        let mut record_buf: Vec<u8> = Vec::with_capacity(8);
        let mut next_loop_buf: Vec<u8> = Vec::with_capacity(8);
        let mut unrecognized_buf: Vec<u8> = Vec::with_capacity(8);
        let invalid_buf: Vec<u8> = vec![1, 2, 3, 4, 5, 6, 7, 8];

        record_event.to_midi_event()?.write(&mut record_buf)?;
        next_loop_event.to_midi_event()?.write(&mut next_loop_buf)?;
        unrecognized_event.write(&mut unrecognized_buf)?;

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let audio_engine = Arc::new(audio::test::Engine::get("mock-audio", completions_tx));
        let surface = display::Mock::new();
        let midi_device = Arc::new(midi::test::Device::get("mock-midi-device"));
        let engine = Engine::new(
            Session {
                loop_count: 2,
                ..Session::default()
            },
            Timeline::new(Arc::new(Monotonic::new())),
            audio_engine.clone(),
            Some(midi_device.clone()),
            Arc::new(surface.clone()),
        );

        let driver = super::Driver::new(
            MidiController::new(
                record_event,
                overdub_event,
                multiply_event,
                insert_event,
                mute_event,
                undo_event,
                next_loop_event,
                None,
            ),
            midi_device.clone(),
        )?;

        let drivers: Vec<Arc<dyn crate::controller::Driver>> = vec![driver];
        let _controller = Controller::new(engine, completions_rx, drivers)?;

        // Unrecognized and invalid events must be ignored.
        midi_device.mock_event(&invalid_buf);
        midi_device.mock_event(&unrecognized_buf);
        midi_device.mock_event(&record_buf);

        eventually(
            || surface.texts().iter().any(|text| text == "rEC"),
            "Record never reached the engine",
        );

        // Switching emits an outbound program change for loop 2.
        midi_device.mock_event(&next_loop_buf);
        eventually(
            || {
                midi_device.emitted_events().iter().any(|buf| {
                    midly::live::LiveEvent::parse(buf).is_ok_and(|event| {
                        matches!(
                            event,
                            midly::live::LiveEvent::Midi {
                                message: midly::MidiMessage::ProgramChange { program },
                                ..
                            } if program.as_int() == 1
                        )
                    })
                })
            },
            "Program change was never emitted",
        );

        midi_device.stop_watch_events();

        Ok(())
    }
}
