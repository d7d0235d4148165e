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
use std::{
    error::Error,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::session::{BufferHandle, LoopId};

use super::{CaptureKind, Completion, PlaybackParams};

/// An intent the mock engine received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    BeginCapture(LoopId),
    EndCapture(LoopId, CaptureKind),
    BeginOverdubCapture(LoopId),
    Mix {
        base: BufferHandle,
        overdub: BufferHandle,
        level: f64,
    },
    SetPlaybackParams(LoopId, PlaybackParams),
}

/// A mock engine. Doesn't capture anything; records the intents it receives
/// and confirms captures only when told to, so tests control the timing of
/// the asynchronous completion path.
#[derive(Clone)]
pub struct Engine {
    name: String,
    intents: Arc<Mutex<Vec<Intent>>>,
    outstanding: Arc<Mutex<Vec<(LoopId, CaptureKind)>>>,
    completions: UnboundedSender<Completion>,
    next_buffer: Arc<AtomicU64>,
}

impl Engine {
    /// Gets the given mock engine.
    pub fn get(name: &str, completions: UnboundedSender<Completion>) -> Engine {
        Engine {
            name: name.to_string(),
            intents: Arc::new(Mutex::new(Vec::new())),
            outstanding: Arc::new(Mutex::new(Vec::new())),
            completions,
            next_buffer: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The intents received so far.
    #[cfg(test)]
    pub fn intents(&self) -> Vec<Intent> {
        self.intents.lock().clone()
    }

    /// Drops the recorded intents.
    #[cfg(test)]
    pub fn reset_intents(&self) {
        self.intents.lock().clear();
    }

    /// The captures that have ended but not yet been confirmed.
    #[cfg(test)]
    pub fn outstanding_captures(&self) -> Vec<(LoopId, CaptureKind)> {
        self.outstanding.lock().clone()
    }

    /// Confirms the oldest outstanding capture for the loop, sending the
    /// completion the transport is waiting on. Returns the buffer handle.
    #[cfg(test)]
    pub fn confirm(&self, loop_id: LoopId) -> Option<BufferHandle> {
        let mut outstanding = self.outstanding.lock();
        let position = outstanding.iter().position(|(id, _)| *id == loop_id)?;
        let (_, kind) = outstanding.remove(position);

        let buffer = BufferHandle(self.next_buffer.fetch_add(1, Ordering::Relaxed));
        let _ = self.completions.send(Completion {
            loop_id,
            kind,
            buffer,
        });
        Some(buffer)
    }

    fn record(&self, intent: Intent) {
        self.intents.lock().push(intent);
    }
}

impl super::Engine for Engine {
    fn begin_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>> {
        self.record(Intent::BeginCapture(loop_id));
        Ok(())
    }

    fn end_capture(&self, loop_id: LoopId, kind: CaptureKind) -> Result<(), Box<dyn Error>> {
        self.record(Intent::EndCapture(loop_id, kind));
        self.outstanding.lock().push((loop_id, kind));
        Ok(())
    }

    fn begin_overdub_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>> {
        self.record(Intent::BeginOverdubCapture(loop_id));
        Ok(())
    }

    fn mix(
        &self,
        base: BufferHandle,
        overdub: BufferHandle,
        level: f64,
    ) -> Result<BufferHandle, Box<dyn Error>> {
        self.record(Intent::Mix {
            base,
            overdub,
            level,
        });
        Ok(BufferHandle(self.next_buffer.fetch_add(1, Ordering::Relaxed)))
    }

    fn set_playback_params(
        &self,
        loop_id: LoopId,
        params: PlaybackParams,
    ) -> Result<(), Box<dyn Error>> {
        self.record(Intent::SetPlaybackParams(loop_id, params));
        Ok(())
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Engine>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
