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
use std::fmt;
use std::time::Duration;

/// An immutable decoded PCM buffer. Samples are f32 and interleaved if multi-channel.
pub struct SampleBuffer {
    /// The sample data.
    data: Vec<f32>,
    /// Number of channels in the sample.
    channels: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
    /// Bit depth of the source the data was decoded from.
    bits_per_sample: u16,
}

impl SampleBuffer {
    /// Creates a new sample buffer from decoded data.
    pub fn new(data: Vec<f32>, channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            data,
            channels: channels.max(1),
            sample_rate,
            bits_per_sample,
        }
    }

    /// Creates a 32-bit float sample buffer.
    pub fn from_samples(data: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self::new(data, channels, sample_rate, 32)
    }

    /// Returns the interleaved sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the bit depth of the decoded source.
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channels as usize
    }

    /// Returns the playback duration at the buffer's own sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Returns the left/right values of a frame. Mono feeds both sides, and channels past
    /// the second are ignored.
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let start = frame * channels;
        match self.data.get(start..start + channels) {
            Some([mono]) => (*mono, *mono),
            Some([left, right, ..]) => (*left, *right),
            _ => (0.0, 0.0),
        }
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("frames", &self.frames())
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("bits_per_sample", &self.bits_per_sample)
            .finish()
    }
}
