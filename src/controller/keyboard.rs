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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use crate::session::LoopId;

use super::Action;

const RECORD: &str = "record";
const OVERDUB: &str = "overdub";
const MULTIPLY: &str = "multiply";
const INSERT: &str = "insert";
const SUBSTITUTE: &str = "substitute";
const REPLACE: &str = "replace";
const MUTE: &str = "mute";
const REVERSE: &str = "reverse";
const HALFSPEED: &str = "halfspeed";
const UNDO: &str = "undo";
const RETRIGGER: &str = "retrigger";
const STARTPOINT: &str = "startpoint";
const NEXT: &str = "next";
const PREV: &str = "prev";
const CONFIRM: &str = "confirm";
const RESET: &str = "reset";
const RESET_ALL: &str = "reset_all";

/// A controller that drives the looper from the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    fn monitor_io<R, W>(
        actions_tx: &Sender<Action>,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, loop <n>): ",
            RECORD,
            OVERDUB,
            MULTIPLY,
            INSERT,
            SUBSTITUTE,
            REPLACE,
            MUTE,
            REVERSE,
            HALFSPEED,
            UNDO,
            RETRIGGER,
            STARTPOINT,
            NEXT,
            PREV,
            CONFIRM,
            RESET,
            RESET_ALL,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        reader.read_line(&mut input)?;

        let input = input.trim().to_lowercase();
        let action = match input.as_str() {
            RECORD => Some(Action::Record),
            OVERDUB => Some(Action::Overdub),
            MULTIPLY => Some(Action::Multiply),
            INSERT => Some(Action::Insert),
            SUBSTITUTE => Some(Action::Substitute),
            REPLACE => Some(Action::Replace),
            MUTE => Some(Action::Mute),
            REVERSE => Some(Action::Reverse),
            HALFSPEED => Some(Action::HalfSpeed),
            UNDO => Some(Action::Undo),
            RETRIGGER => Some(Action::Retrigger),
            STARTPOINT => Some(Action::StartPoint),
            NEXT => Some(Action::NextLoop),
            PREV => Some(Action::PrevLoop),
            CONFIRM => Some(Action::Confirm),
            RESET => Some(Action::Reset),
            RESET_ALL => Some(Action::GeneralReset),
            other => match other.strip_prefix("loop ") {
                Some(number) => match number.parse::<usize>() {
                    Ok(number) if number >= 1 => Some(Action::SwitchLoop(LoopId::new(number))),
                    _ => {
                        warn!(input = other, "Unrecognized loop number");
                        None
                    }
                },
                None => {
                    warn!(input = other, "Unrecognized input");
                    None
                }
            },
        };

        if let Some(action) = action {
            actions_tx
                .blocking_send(action)
                .map_err(io::Error::other)?;
        }
        Ok(())
    }
}

impl super::Driver for Driver {
    fn monitor_actions(&self, actions_tx: Sender<Action>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            loop {
                Self::monitor_io(&actions_tx, io::stdin().lock(), io::stdout())?;
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, BufReader, BufWriter};

    use tokio::sync::mpsc;

    use crate::controller::Action;
    use crate::session::LoopId;

    use super::{Driver, MULTIPLY, NEXT, RECORD, RESET_ALL, UNDO};

    fn get_action(input: &str) -> Result<Option<Action>, io::Error> {
        let (sender, mut receiver) = mpsc::channel::<Action>(1);

        let reader_bytes = input.as_bytes();
        let reader = BufReader::new(reader_bytes);

        let writer_bytes: Vec<u8> = vec![0; 255];
        let writer = BufWriter::new(writer_bytes);
        Driver::monitor_io(&sender, reader, writer)?;

        // Force the sender to close.
        drop(sender);
        Ok(receiver.blocking_recv())
    }

    #[test]
    fn test_keyboard_actions() -> Result<(), io::Error> {
        assert_eq!(Action::Record, get_action(RECORD)?.unwrap());
        assert_eq!(Action::Multiply, get_action(MULTIPLY)?.unwrap());
        assert_eq!(Action::Undo, get_action(UNDO)?.unwrap());
        assert_eq!(Action::NextLoop, get_action(NEXT)?.unwrap());
        assert_eq!(Action::GeneralReset, get_action(RESET_ALL)?.unwrap());
        assert_eq!(
            Action::SwitchLoop(LoopId::new(3)),
            get_action("loop 3")?.unwrap()
        );
        assert_eq!(None, get_action("unrecognized")?);
        assert_eq!(None, get_action("loop zero")?);
        Ok(())
    }
}
