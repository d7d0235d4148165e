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
};

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::session::{BufferHandle, LoopId};

use super::{CaptureKind, Completion, PlaybackParams};

/// An audio engine that acknowledges every intent immediately. Stands in
/// for a real capture backend when none is wired up; useful for exercising
/// the transport end to end without audio hardware.
pub struct Engine {
    name: String,
    completions: UnboundedSender<Completion>,
    next_buffer: AtomicU64,
}

impl Engine {
    pub fn new(name: &str, completions: UnboundedSender<Completion>) -> Engine {
        Engine {
            name: name.to_string(),
            completions,
            next_buffer: AtomicU64::new(1),
        }
    }

    fn confirm(&self, loop_id: LoopId, kind: CaptureKind) {
        let buffer = BufferHandle(self.next_buffer.fetch_add(1, Ordering::Relaxed));
        // The reactor may already be gone during shutdown; that's fine.
        let _ = self.completions.send(Completion {
            loop_id,
            kind,
            buffer,
        });
    }
}

impl super::Engine for Engine {
    fn begin_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>> {
        info!(engine = self.name, loop_id = loop_id.number(), "Begin capture.");
        Ok(())
    }

    fn end_capture(&self, loop_id: LoopId, kind: CaptureKind) -> Result<(), Box<dyn Error>> {
        info!(
            engine = self.name,
            loop_id = loop_id.number(),
            kind = kind.name(),
            "End capture."
        );
        self.confirm(loop_id, kind);
        Ok(())
    }

    fn begin_overdub_capture(&self, loop_id: LoopId) -> Result<(), Box<dyn Error>> {
        info!(
            engine = self.name,
            loop_id = loop_id.number(),
            "Begin overdub capture."
        );
        Ok(())
    }

    fn mix(
        &self,
        base: BufferHandle,
        _overdub: BufferHandle,
        level: f64,
    ) -> Result<BufferHandle, Box<dyn Error>> {
        info!(engine = self.name, level = level, "Mix.");
        Ok(base)
    }

    fn set_playback_params(
        &self,
        loop_id: LoopId,
        params: PlaybackParams,
    ) -> Result<(), Box<dyn Error>> {
        info!(
            engine = self.name,
            loop_id = loop_id.number(),
            params = format!("{:?}", params),
            "Set playback params."
        );
        Ok(())
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<std::sync::Arc<super::mock::Engine>, Box<dyn Error>> {
        Err("not a mock engine".into())
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Auto)", self.name)
    }
}
