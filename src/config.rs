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
use std::fs;
use std::path::Path;
use std::sync::Arc;

use config::{Config, File};
use tokio::sync::mpsc;

use crate::audio;
use crate::display;
use crate::engine::Engine;
use crate::timing::{Monotonic, Timeline};

mod controller;
mod error;
mod looper;
pub mod midi;
mod session;

pub use self::controller::{Controller, MidiController};
pub use self::error::ConfigError;
pub use self::session::SessionConfig;

use self::looper::Looper;

/// Loads a session configuration (a preset) from the given file.
pub fn load_session(path: &Path) -> Result<SessionConfig, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize::<SessionConfig>()?)
}

/// Saves a session configuration to the given file.
pub fn save_session(path: &Path, config: &SessionConfig) -> Result<(), ConfigError> {
    fs::write(path, serde_yml::to_string(config)?)?;
    Ok(())
}

/// Initializes the engine and controller from the given config file and
/// returns the controller. The controller owns the engine, which can be
/// waited on until it exits. Realistically, the controller is not expected
/// to exit.
pub fn init_engine_and_controller(
    config_path: &Path,
) -> Result<crate::controller::Controller, Box<dyn Error>> {
    let looper: Looper = Config::builder()
        .add_source(File::from(config_path))
        .build()
        .map_err(ConfigError::Load)?
        .try_deserialize()
        .map_err(ConfigError::Load)?;

    let session = looper.session.unwrap_or_default().to_session()?;

    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let audio_engine = audio::get_engine(&looper.audio_engine, completions_tx)?;
    let midi_device = looper
        .midi_device
        .as_deref()
        .map(crate::midi::get_device)
        .transpose()?;

    let engine = Engine::new(
        session,
        Timeline::new(Arc::new(Monotonic::new())),
        audio_engine,
        midi_device.clone(),
        display::get_surface(looper.display.as_deref().unwrap_or("log")),
    );

    let mut drivers: Vec<Arc<dyn crate::controller::Driver>> = Vec::new();
    for controller in looper.controllers.iter() {
        match controller {
            Controller::Keyboard => {
                drivers.push(Arc::new(crate::controller::keyboard::Driver::new()))
            }
            Controller::Midi(midi_controller) => {
                let midi_device = midi_device
                    .clone()
                    .ok_or("MIDI controller configured without a MIDI device")?;
                drivers.push(crate::controller::midi::Driver::new(
                    midi_controller.clone(),
                    midi_device,
                )?);
            }
        }
    }
    if drivers.is_empty() {
        return Err("no controllers configured".into());
    }

    crate::controller::Controller::new(engine, completions_rx, drivers)
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use crate::session::QuantizeMode;

    use super::{load_session, save_session, SessionConfig};

    #[test]
    fn test_session_save_and_load() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("session.yaml");

        let config: SessionConfig = serde_yml::from_str(
            r#"
loops: 8
memory: 120s
quantize: loop
"#,
        )?;
        save_session(&path, &config)?;

        let loaded = load_session(&path)?;
        let session = loaded.to_session()?;
        assert_eq!(8, session.loop_count);
        assert_eq!(120.0, session.total_memory_seconds);
        assert_eq!(QuantizeMode::Loop, session.quantize);
        Ok(())
    }

    #[test]
    fn test_load_missing_file_is_typed() {
        let missing = std::path::Path::new("/definitely/not/here.yaml");
        assert!(matches!(
            load_session(missing),
            Err(super::ConfigError::Load(_))
        ));
    }
}
