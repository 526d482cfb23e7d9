// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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

//! The audio backend contract the engine drives, plus its implementations.
//!
//! The engine never renders audio itself. It creates submix buses and voices on a
//! [`Backend`], submits sample buffers to voices, and batches parameter changes and
//! starts into operation sets that the backend applies atomically on commit.

use std::{fmt, sync::Arc};

use crate::samples::SampleBuffer;

pub mod context;
pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod thread_priority;

pub use context::AudioContext;

/// A batching token. Everything tagged with the same operation set is applied together
/// when that set is committed.
pub type OperationSet = u32;

/// The operation set that is applied immediately, without waiting for a commit.
pub const COMMIT_NOW: OperationSet = 0;

/// Identifies a voice created by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// Identifies a submix bus created by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(pub u64);

/// Peak output levels, linear.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Levels {
    pub left: f32,
    pub right: f32,
}

/// Errors raised by audio backends.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("unknown voice {0:?}")]
    UnknownVoice(VoiceId),

    #[error("unknown bus {0:?}")]
    UnknownBus(BusId),

    #[error("no output device found with name {0}")]
    DeviceNotFound(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unsupported audio: {0}")]
    Unsupported(String),

    #[error("audio decode error: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The narrow contract between the engine and the thing that actually makes sound.
///
/// Bus and voice handles are only valid for the backend that created them. Parameter
/// setters tagged with an operation set other than [`COMMIT_NOW`] are deferred until
/// [`Backend::commit`] is called with that set.
pub trait Backend: fmt::Display + Send + Sync {
    /// Creates a submix bus. A bus without a parent feeds the master output.
    fn create_submix(&self, parent: Option<BusId>) -> Result<BusId, AudioError>;

    /// Destroys a submix bus. Unknown buses are ignored.
    fn destroy_submix(&self, bus: BusId);

    /// Creates a voice able to play the given sample's format, routed to the given bus.
    fn create_voice(&self, sample: &SampleBuffer, bus: BusId) -> Result<VoiceId, AudioError>;

    /// Destroys a voice. Unknown voices are ignored.
    fn destroy_voice(&self, voice: VoiceId);

    /// Queues a buffer on the voice.
    fn submit(&self, voice: VoiceId, sample: &Arc<SampleBuffer>) -> Result<(), AudioError>;

    /// Sets the voice's playback frequency ratio (1.0 is the sample's own pitch).
    fn set_frequency_ratio(&self, voice: VoiceId, ratio: f32, operation_set: OperationSet);

    /// Sets the voice's linear volume.
    fn set_volume(&self, voice: VoiceId, amplitude: f32, operation_set: OperationSet);

    /// Starts the voice.
    fn start(&self, voice: VoiceId, operation_set: OperationSet);

    /// Returns the number of buffers still queued or playing on the voice.
    fn queued_buffers(&self, voice: VoiceId) -> usize;

    /// Applies every pending change tagged with the given operation set.
    fn commit(&self, operation_set: OperationSet);

    /// Sets a bus's linear volume. Applied immediately.
    fn set_bus_volume(&self, bus: BusId, amplitude: f32);

    /// Sets a bus's left/right channel gains. Applied immediately.
    fn set_channel_volumes(&self, bus: BusId, left: f32, right: f32);

    /// Sets the master output's linear volume. Applied immediately.
    fn set_master_volume(&self, amplitude: f32);

    /// Returns the most recent peak output levels.
    fn levels(&self) -> Levels;
}

/// Gets a backend for the given device name. Names starting with "mock" select the mock
/// backend; no name selects the default output device.
pub fn get_backend(device: Option<&str>) -> Result<Arc<dyn Backend>, AudioError> {
    match device {
        Some(name) if name.starts_with("mock") => Ok(Arc::new(mock::Backend::quiet(name))),
        name => Ok(Arc::new(cpal::Backend::open(name)?)),
    }
}

/// Lists the names of the output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, AudioError> {
    cpal::list_devices()
}
