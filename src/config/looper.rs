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
use serde::Deserialize;

use super::controller::Controller;
use super::session::SessionConfig;

/// The configuration for the looper.
#[derive(Deserialize)]
pub(super) struct Looper {
    /// The controller configurations.
    pub controllers: Vec<Controller>,
    /// The audio engine to capture and render through.
    pub audio_engine: String,
    /// The MIDI device to use.
    pub midi_device: Option<String>,
    /// The display surface to render indicators to. Defaults to the log.
    pub display: Option<String>,
    /// The session configuration.
    pub session: Option<SessionConfig>,
}
