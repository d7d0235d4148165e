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
use std::{error::Error, fmt, sync::Arc};

use tokio::sync::mpsc::UnboundedSender;

use crate::session::{BufferHandle, LoopId};

pub mod auto;
pub mod mock;

/// Playback parameters the transport pushes down to the audio engine. The
/// engine keeps playing internally while muted; it simply stops emitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackParams {
    pub reversed: bool,
    pub half_speed: bool,
    pub muted: bool,
    pub start_offset: f64,
}

/// The kind of capture a completion confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Record,
    Overdub,
    Insert,
    Substitute,
    Replace,
}

impl CaptureKind {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureKind::Record => "record",
            CaptureKind::Overdub => "overdub",
            CaptureKind::Insert => "insert",
            CaptureKind::Substitute => "substitute",
            CaptureKind::Replace => "replace",
        }
    }
}

/// Confirmation that a capture the transport requested has finished. May
/// arrive on a different tick than the request; the transport re-validates
/// before applying it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    pub loop_id: LoopId,
    pub kind: CaptureKind,
    pub buffer: BufferHandle,
}

/// The audio engine collaborator. All calls are fire-and-forget intents;
/// capture results come back as [`Completion`]s on the channel handed over
/// at construction. The transport never inspects buffer contents.
pub trait Engine: fmt::Display + Send + Sync {
    /// Starts capturing new base material for the loop.
    fn begin_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>>;

    /// Stops the capture; the buffer handle arrives as a completion.
    fn end_capture(&self, loop_id: LoopId, kind: CaptureKind) -> Result<(), Box<dyn Error>>;

    /// Starts capturing a pass to blend over existing material.
    fn begin_overdub_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>>;

    /// Blends an overdub buffer onto a base buffer at the given level and
    /// returns the blended buffer.
    fn mix(
        &self,
        base: BufferHandle,
        overdub: BufferHandle,
        level: f64,
    ) -> Result<BufferHandle, Box<dyn Error>>;

    /// Pushes playback parameters for the loop.
    fn set_playback_params(
        &self,
        loop_id: LoopId,
        params: PlaybackParams,
    ) -> Result<(), Box<dyn Error>>;

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Engine>, Box<dyn Error>>;
}

/// Gets an audio engine with the given name.
pub fn get_engine(
    name: &str,
    completions: UnboundedSender<Completion>,
) -> Result<Arc<dyn Engine>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Engine::get(name, completions)));
    }

    Ok(Arc::new(auto::Engine::new(name, completions)))
}

#[cfg(test)]
pub mod test {
    pub use super::mock::Engine;
}
