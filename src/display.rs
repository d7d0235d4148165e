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
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

/// How long transient display messages stay up.
pub const MESSAGE_DURATION_MS: u32 = 1000;

/// The front panel controls that carry an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Record,
    Overdub,
    Multiply,
    Insert,
    Mute,
    Undo,
    NextLoop,
}

/// Indicator colors, hardware convention: green is available, orange is
/// pending, red is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Off,
    Green,
    Orange,
    Red,
}

/// A transient text notification for the display surface.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayEvent {
    pub text: String,
    pub duration_ms: u32,
}

impl DisplayEvent {
    pub fn new(text: impl Into<String>) -> DisplayEvent {
        DisplayEvent {
            text: text.into(),
            duration_ms: MESSAGE_DURATION_MS,
        }
    }
}

/// An indicator update for the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub control: Control,
    pub color: LedColor,
}

/// Something that renders engine state changes. The engine emits on every
/// state change and has no idea how (or whether) the events are drawn.
pub trait Surface: Send + Sync {
    fn display(&self, event: DisplayEvent);
    fn led(&self, state: LedState);
}

/// Gets a surface with the given name.
pub fn get_surface(name: &str) -> Arc<dyn Surface> {
    if name.starts_with("mock") {
        return Arc::new(Mock::new());
    }

    Arc::new(Log::new())
}

/// A surface that writes everything to the log.
pub struct Log {}

impl Log {
    pub fn new() -> Log {
        Log {}
    }
}

impl Surface for Log {
    fn display(&self, event: DisplayEvent) {
        info!(text = event.text, duration_ms = event.duration_ms, "Display.");
    }

    fn led(&self, state: LedState) {
        info!(
            control = format!("{:?}", state.control),
            color = format!("{:?}", state.color),
            "LED."
        );
    }
}

/// A surface that records everything it is shown.
#[derive(Clone)]
pub struct Mock {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
    leds: Arc<Mutex<Vec<LedState>>>,
}

impl Mock {
    pub fn new() -> Mock {
        Mock {
            events: Arc::new(Mutex::new(Vec::new())),
            leds: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The texts shown so far.
    #[cfg(test)]
    pub fn texts(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.text.clone()).collect()
    }

    /// The most recent color set for the given control.
    #[cfg(test)]
    pub fn led_color(&self, control: Control) -> Option<LedColor> {
        self.leds
            .lock()
            .iter()
            .rev()
            .find(|state| state.control == control)
            .map(|state| state.color)
    }
}

impl Surface for Mock {
    fn display(&self, event: DisplayEvent) {
        self.events.lock().push(event);
    }

    fn led(&self, state: LedState) {
        self.leds.lock().push(state);
    }
}

impl fmt::Display for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mock surface")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mock_surface_records_in_order() {
        let mock = Mock::new();
        mock.display(DisplayEvent::new("rEC"));
        mock.display(DisplayEvent::new("PLAY"));
        mock.led(LedState {
            control: Control::Record,
            color: LedColor::Red,
        });
        mock.led(LedState {
            control: Control::Record,
            color: LedColor::Green,
        });

        assert_eq!(vec!["rEC".to_string(), "PLAY".to_string()], mock.texts());
        // The most recent write wins.
        assert_eq!(Some(LedColor::Green), mock.led_color(Control::Record));
        assert_eq!(None, mock.led_color(Control::Mute));
    }
}
