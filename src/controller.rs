// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, span, Level};

use crate::audio::Completion;
use crate::engine::{Command, Engine, ResetTarget, SCHEDULER_TICK_SECONDS};
use crate::session::LoopId;

pub mod keyboard;
pub mod midi;

/// Panel actions that will trigger behavior in the engine. The functions a
/// performer reaches from a pedal or the front panel always address the
/// active loop; the controller resolves them to engine commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Toggles recording on the active loop.
    Record,

    /// Toggles overdubbing on the active loop.
    Overdub,

    /// Toggles multiply on the active loop.
    Multiply,

    /// Toggles insert on the active loop.
    Insert,

    /// Toggles a substitute pass on the active loop.
    Substitute,

    /// Toggles a replace pass on the active loop.
    Replace,

    /// Toggles mute on the active loop.
    Mute,

    /// Toggles reverse playback on the active loop.
    Reverse,

    /// Toggles half-speed playback on the active loop.
    HalfSpeed,

    /// Undoes the most recent destructive operation on the active loop.
    Undo,

    /// Restarts the active loop from its start point.
    Retrigger,

    /// Moves the active loop's start point to the current position.
    StartPoint,

    /// Moves to the next loop slot.
    NextLoop,

    /// Moves to the previous loop slot.
    PrevLoop,

    /// Switches directly to the given loop slot.
    SwitchLoop(LoopId),

    /// Confirms a held loop switch.
    Confirm,

    /// Resets the active loop.
    Reset,

    /// Resets every loop.
    GeneralReset,
}

impl Action {
    /// Resolves the action to an engine command against the active loop.
    fn to_command(self, active: LoopId) -> Command {
        match self {
            Action::Record => Command::Record(active),
            Action::Overdub => Command::Overdub(active),
            Action::Multiply => Command::Multiply(active),
            Action::Insert => Command::Insert(active),
            Action::Substitute => Command::Substitute(active),
            Action::Replace => Command::Replace(active),
            Action::Mute => Command::Mute(active),
            Action::Reverse => Command::Reverse(active),
            Action::HalfSpeed => Command::HalfSpeed(active),
            Action::Undo => Command::Undo(active),
            Action::Retrigger => Command::Retrigger(active),
            Action::StartPoint => Command::StartPoint(active),
            Action::NextLoop => Command::NextLoop,
            Action::PrevLoop => Command::PrevLoop,
            Action::SwitchLoop(id) => Command::SwitchLoop(id),
            Action::Confirm => Command::Confirm,
            Action::Reset => Command::Reset(ResetTarget::Loop(active)),
            Action::GeneralReset => Command::Reset(ResetTarget::All),
        }
    }
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_actions(&self, actions_tx: mpsc::Sender<Action>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives the engine: the single task that owns it, feeding it driver
/// actions, scheduler ticks and audio-engine completions in sequence.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given drivers.
    pub fn new(
        engine: Engine,
        completions_rx: mpsc::UnboundedReceiver<Completion>,
        drivers: Vec<Arc<dyn Driver>>,
    ) -> Result<Controller, Box<dyn Error>> {
        Ok(Controller {
            handle: tokio::spawn(async move {
                Controller::run(engine, completions_rx, drivers).await
            }),
        })
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// The reactor loop. Exactly one intent is in flight at a time; the
    /// engine never sees concurrent mutation.
    async fn run(
        mut engine: Engine,
        mut completions_rx: mpsc::UnboundedReceiver<Completion>,
        drivers: Vec<Arc<dyn Driver>>,
    ) {
        let span = span!(Level::INFO, "controller");

        let (actions_tx, mut actions_rx) = mpsc::channel::<Action>(16);
        let mut monitors = Vec::new();
        for driver in drivers.iter() {
            monitors.push(driver.monitor_actions(actions_tx.clone()));
        }
        // The controller's copy must go away so closing every driver closes
        // the channel.
        drop(actions_tx);

        let mut tick = tokio::time::interval(Duration::from_secs_f64(SCHEDULER_TICK_SECONDS));

        span.in_scope(|| {
            info!(
                loops = engine.session().loop_count,
                active = engine.session().active_loop.number(),
                "Controller started."
            )
        });

        loop {
            tokio::select! {
                action = actions_rx.recv() => {
                    match action {
                        Some(action) => span.in_scope(|| {
                            info!(action = format!("{:?}", action), "Received action.");
                            let command = action.to_command(engine.session().active_loop);
                            if let Err(e) = engine.command(command) {
                                // Already surfaced on the display; log and
                                // keep running.
                                error!(err = e.to_string(), "Error talking to engine.");
                            }
                        }),
                        None => {
                            span.in_scope(|| info!("Controller closing."));
                            for monitor in monitors {
                                if let Err(e) = monitor.await {
                                    span.in_scope(|| {
                                        error!("Error waiting for action monitor to stop: {}", e)
                                    });
                                }
                            }
                            return;
                        }
                    }
                }
                completion = completions_rx.recv() => {
                    if let Some(completion) = completion {
                        span.in_scope(|| engine.completion(completion));
                    }
                }
                _ = tick.tick() => {
                    engine.tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        error::Error,
        io,
        sync::{Arc, Barrier, Mutex},
    };

    use tokio::{sync::mpsc, task::JoinHandle};

    use crate::audio;
    use crate::display;
    use crate::engine::Engine;
    use crate::session::Session;
    use crate::testutil::eventually;
    use crate::timing::{Monotonic, Timeline};

    use super::{Action, Controller, Driver};

    #[derive(Debug, Clone, Copy)]
    enum TestEvent {
        Unset,
        Act(Action),
        Close,
    }

    struct TestDriver {
        current_event: Arc<Mutex<TestEvent>>,
        barrier: Arc<Barrier>,
    }

    impl TestDriver {
        /// Creates a new test driver which is explicitly controlled by the
        /// next_event function.
        fn new() -> TestDriver {
            TestDriver {
                current_event: Arc::new(Mutex::new(TestEvent::Unset)),
                barrier: Arc::new(Barrier::new(2)),
            }
        }

        /// Signals the next event to the monitor thread.
        fn next_event(&self, event: TestEvent) {
            {
                let mut current_event = self.current_event.lock().expect("failed to get lock");
                *current_event = event;
            }
            // Wait until the thread goes to receive the event.
            self.barrier.wait();
            // Wait until the thread has locked the mutex.
            self.barrier.wait();
        }
    }

    impl Driver for TestDriver {
        fn monitor_actions(
            &self,
            actions_tx: mpsc::Sender<Action>,
        ) -> JoinHandle<Result<(), io::Error>> {
            let barrier = self.barrier.clone();
            let current_event = self.current_event.clone();
            tokio::task::spawn_blocking(move || loop {
                // Wait for next event to set the current event.
                barrier.wait();
                let current_event = *current_event.lock().expect("failed to get lock");
                // Let next event know that we got the event.
                barrier.wait();
                match current_event {
                    TestEvent::Unset => panic!("current event should not be unset"),
                    TestEvent::Act(action) => {
                        assert!(actions_tx.blocking_send(action).is_ok())
                    }
                    TestEvent::Close => return Ok(()),
                }
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() -> Result<(), Box<dyn Error>> {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let audio_engine = Arc::new(audio::test::Engine::get("mock-audio", completions_tx));
        let surface = display::Mock::new();
        let session = Session {
            loop_count: 2,
            ..Session::default()
        };
        let engine = Engine::new(
            session,
            Timeline::new(Arc::new(Monotonic::new())),
            audio_engine.clone(),
            None,
            Arc::new(surface.clone()),
        );

        let driver = Arc::new(TestDriver::new());
        let drivers: Vec<Arc<dyn Driver>> = vec![driver.clone()];
        let mut controller = Controller::new(engine, completions_rx, drivers)?;

        // Record lands on the active loop and lights up the display.
        driver.next_event(TestEvent::Act(Action::Record));
        eventually(
            || surface.texts().iter().any(|text| text == "rEC"),
            "Record never reached the engine",
        );
        eventually(
            || {
                audio_engine
                    .intents()
                    .iter()
                    .any(|intent| matches!(intent, audio::mock::Intent::BeginCapture(_)))
            },
            "Capture never started",
        );

        // Switching loops goes through the same path.
        driver.next_event(TestEvent::Act(Action::NextLoop));
        eventually(
            || surface.texts().iter().any(|text| text == "LP 2"),
            "Switch never reached the engine",
        );

        // An action that fails engine validation must not kill the reactor.
        driver.next_event(TestEvent::Act(Action::Overdub));
        eventually(
            || surface.texts().iter().any(|text| text == "E.Et"),
            "Error was never surfaced",
        );

        driver.next_event(TestEvent::Close);
        assert!(
            controller.join().await.is_ok(),
            "Error waiting for controller",
        );

        Ok(())
    }
}
