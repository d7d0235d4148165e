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
mod audio;
mod config;
mod controller;
mod display;
mod engine;
mod error;
mod memory;
mod midi;
mod quantize;
mod registry;
mod session;
#[cfg(test)]
mod testutil;
mod timing;
mod undo;
mod util;

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};

use crate::util::duration_minutes_seconds;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=multi-loop looper

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/mloop
ExecStart=/usr/local/bin/mloop start "$MLOOP_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=mloop.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A multi-loop looper."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI input/output devices.
    MidiDevices {},
    /// Verifies a session preset and prints the resulting configuration.
    Session {
        /// The path to the session preset.
        preset_path: String,
    },
    /// Start will start the looper.
    Start {
        /// The path to the looper config.
        config_path: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Session { preset_path } => {
            let preset = config::load_session(&PathBuf::from(preset_path))?;
            let session = preset.to_session()?;

            println!("Session:");
            println!("- loops: {}", session.loop_count);
            println!(
                "- memory: {} ({} per loop)",
                duration_minutes_seconds(Duration::from_secs_f64(session.total_memory_seconds)),
                duration_minutes_seconds(Duration::from_secs_f64(
                    session.total_memory_seconds / session.loop_count as f64
                )),
            );
            println!("- quantize: {:?}", session.quantize);
            println!("- switch quantize: {:?}", session.switch_quantize);
            println!("- subdivisions: {}", session.subdivisions_per_cycle);
            println!("- rounding: {:?}", session.rounding);
            println!("- record mode: {:?}", session.record_mode);
            println!("- undo depth: {}", session.undo_depth);
        }
        Commands::Start { config_path } => {
            config::init_engine_and_controller(&PathBuf::from(config_path))?
                .join()
                .await?;
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
