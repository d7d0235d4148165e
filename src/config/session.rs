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
use std::time::Duration;

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use crate::session::{
    LoopId, QuantizeMode, RecordMode, RoundingMode, Session, SwitchQuantize, MAX_LOOPS,
    SUBDIVISION_RANGE,
};

/// A YAML representation of the session configuration. Durations are human
/// strings ("80s", "2500ms"); omitted fields fall back to the hardware
/// defaults.
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct SessionConfig {
    /// The number of loop slots sharing the memory budget.
    loops: Option<usize>,

    /// The total sample-memory budget, e.g. "198s".
    memory: Option<String>,

    /// The quantize mode for transport commands.
    quantize: Option<QuantizeMode>,

    /// The quantize mode for loop switches.
    switch_quantize: Option<SwitchQuantize>,

    /// Subdivision boundaries per cycle.
    subdivisions: Option<u8>,

    /// Rounded or unrounded Multiply/Insert completion.
    rounding: Option<RoundingMode>,

    /// How the record control treats a loop that already has content.
    record_mode: Option<RecordMode>,

    /// Loop feedback level, 0.0..=1.0.
    feedback: Option<f64>,

    /// The cycle length granted to Insert on an empty loop, e.g. "2s".
    default_cycle: Option<String>,

    /// Undo stack depth per loop.
    undo_depth: Option<usize>,

    /// How long to wait for the audio engine to confirm a capture.
    external_timeout: Option<String>,

    /// Optional ceiling on a single loop, e.g. "30s".
    max_loop: Option<String>,
}

impl SessionConfig {
    /// Validates the configuration and produces the session value the
    /// engine will own.
    pub fn to_session(&self) -> Result<Session, Box<dyn Error>> {
        let defaults = Session::default();

        let loop_count = self.loops.unwrap_or(defaults.loop_count);
        if loop_count < 1 || loop_count > MAX_LOOPS {
            return Err(format!("loops must be between 1 and {}", MAX_LOOPS).into());
        }

        let subdivisions = self.subdivisions.unwrap_or(defaults.subdivisions_per_cycle);
        if !SUBDIVISION_RANGE.contains(&subdivisions) {
            return Err(format!(
                "subdivisions must be between {} and {}",
                SUBDIVISION_RANGE.start(),
                SUBDIVISION_RANGE.end()
            )
            .into());
        }

        let feedback = self.feedback.unwrap_or(defaults.feedback);
        if !(0.0..=1.0).contains(&feedback) {
            return Err("feedback must be between 0.0 and 1.0".into());
        }

        let total_memory_seconds = match &self.memory {
            Some(memory) => parse_duration(memory)?.as_secs_f64(),
            None => defaults.total_memory_seconds,
        };
        let default_cycle_seconds = match &self.default_cycle {
            Some(cycle) => parse_duration(cycle)?.as_secs_f64(),
            None => defaults.default_cycle_seconds,
        };
        let external_timeout_seconds = match &self.external_timeout {
            Some(timeout) => parse_duration(timeout)?.as_secs_f64(),
            None => defaults.external_timeout_seconds,
        };
        let max_loop_seconds = match &self.max_loop {
            Some(max) => Some(parse_duration(max)?.as_secs_f64()),
            None => None,
        };

        Ok(Session {
            loop_count,
            total_memory_seconds,
            quantize: self.quantize.unwrap_or(defaults.quantize),
            switch_quantize: self.switch_quantize.unwrap_or(defaults.switch_quantize),
            subdivisions_per_cycle: subdivisions,
            active_loop: LoopId::new(1),
            rounding: self.rounding.unwrap_or(defaults.rounding),
            record_mode: self.record_mode.unwrap_or(defaults.record_mode),
            feedback,
            default_cycle_seconds,
            undo_depth: self.undo_depth.unwrap_or(defaults.undo_depth),
            external_timeout_seconds,
            max_loop_seconds,
        })
    }

    /// Captures a session back into its YAML representation, e.g. to save
    /// the running configuration as a preset.
    pub fn from_session(session: &Session) -> SessionConfig {
        SessionConfig {
            loops: Some(session.loop_count),
            memory: Some(format_seconds(session.total_memory_seconds)),
            quantize: Some(session.quantize),
            switch_quantize: Some(session.switch_quantize),
            subdivisions: Some(session.subdivisions_per_cycle),
            rounding: Some(session.rounding),
            record_mode: Some(session.record_mode),
            feedback: Some(session.feedback),
            default_cycle: Some(format_seconds(session.default_cycle_seconds)),
            undo_depth: Some(session.undo_depth),
            external_timeout: Some(format_seconds(session.external_timeout_seconds)),
            max_loop: session.max_loop_seconds.map(format_seconds),
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(value.to_string())?.into())
}

fn format_seconds(seconds: f64) -> String {
    DurationString::new(Duration::from_secs_f64(seconds)).to_string()
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use crate::session::{QuantizeMode, RecordMode, Session};

    use super::SessionConfig;

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let session = SessionConfig::default().to_session()?;
        let defaults = Session::default();
        assert_eq!(defaults.loop_count, session.loop_count);
        assert_eq!(defaults.total_memory_seconds, session.total_memory_seconds);
        assert_eq!(defaults.quantize, session.quantize);
        assert_eq!(defaults.undo_depth, session.undo_depth);
        Ok(())
    }

    #[test]
    fn test_yaml_round_trip() -> Result<(), Box<dyn Error>> {
        let yaml = r#"
loops: 4
memory: 80s
quantize: cycle
switch_quantize: confirm
subdivisions: 8
rounding: unrounded
record_mode: safe
feedback: 0.75
"#;
        let config: SessionConfig = serde_yml::from_str(yaml)?;
        let session = config.to_session()?;
        assert_eq!(4, session.loop_count);
        assert_eq!(80.0, session.total_memory_seconds);
        assert_eq!(QuantizeMode::Cycle, session.quantize);
        assert_eq!(RecordMode::Safe, session.record_mode);
        assert_eq!(0.75, session.feedback);

        // Saving and re-loading preserves the session.
        let saved = serde_yml::to_string(&SessionConfig::from_session(&session))?;
        let reloaded: SessionConfig = serde_yml::from_str(&saved)?;
        let restored = reloaded.to_session()?;
        assert_eq!(session.loop_count, restored.loop_count);
        assert_eq!(session.total_memory_seconds, restored.total_memory_seconds);
        assert_eq!(session.quantize, restored.quantize);
        assert_eq!(session.switch_quantize, restored.switch_quantize);
        assert_eq!(session.rounding, restored.rounding);
        Ok(())
    }

    #[test]
    fn test_validation() {
        let config: SessionConfig = serde_yml::from_str("loops: 0").unwrap();
        assert!(config.to_session().is_err());

        let config: SessionConfig = serde_yml::from_str("subdivisions: 40").unwrap();
        assert!(config.to_session().is_err());

        let config: SessionConfig = serde_yml::from_str("feedback: 1.5").unwrap();
        assert!(config.to_session().is_err());
    }
}
