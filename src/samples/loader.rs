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

//! Sample loading and caching for kit instruments.
//!
//! Samples are decoded entirely into memory when a kit is loaded so that triggering a
//! voice never touches the disk.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info, warn};

use super::SampleBuffer;
use crate::audio::AudioError;

/// Manages loading and caching of sample data.
#[derive(Default)]
pub struct SampleLoader {
    /// Cache of loaded samples by file path.
    cache: HashMap<PathBuf, Arc<SampleBuffer>>,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a sample from a file into memory.
    /// Returns the cached buffer if the file was already loaded.
    pub fn load(&mut self, path: &Path) -> Result<Arc<SampleBuffer>, AudioError> {
        if let Some(sample) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        info!(path = ?path, "Loading sample into memory");
        let sample = Arc::new(decode_file(path)?);

        info!(
            path = ?path,
            frames = sample.frames(),
            channels = sample.channels(),
            sample_rate = sample.sample_rate(),
            duration_ms = sample.duration().as_millis() as u64,
            "Sample loaded"
        );

        self.cache.insert(path.to_path_buf(), sample.clone());
        Ok(sample)
    }

    /// Returns the number of cached samples.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|sample| sample.memory_size()).sum()
    }
}

/// Decodes an entire audio file into an interleaved f32 buffer.
fn decode_file(path: &Path) -> Result<SampleBuffer, AudioError> {
    // Include the path in the error so the user sees which file failed.
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Unsupported(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params.sample_rate.ok_or_else(|| {
        AudioError::Unsupported(format!("{}: sample rate not specified", path.display()))
    })?;
    let bits_per_sample = params.bits_per_sample.unwrap_or(16) as u16;
    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

    let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;
    let mut data: Vec<f32> = Vec::new();

    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(path = ?path, error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }
        let mut buffer = DecodeBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        data.extend_from_slice(buffer.samples());
    }

    if channels == 0 {
        return Err(AudioError::Unsupported(format!(
            "{}: unable to determine channel count",
            path.display()
        )));
    }

    Ok(SampleBuffer::new(data, channels, sample_rate, bits_per_sample))
}

#[cfg(test)]
mod tests {
    use hound::{SampleFormat, WavSpec, WavWriter};

    use super::*;

    fn write_wav(path: &Path, channels: u16, frames: usize) {
        let mut writer = WavWriter::create(
            path,
            WavSpec {
                channels,
                sample_rate: 44100,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )
        .unwrap();
        for _ in 0..frames * channels as usize {
            writer.write_sample(16384i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_wav(&path, 2, 1000);

        let mut loader = SampleLoader::new();
        let sample = loader.load(&path).unwrap();

        assert_eq!(sample.channels(), 2);
        assert_eq!(sample.sample_rate(), 44100);
        assert_eq!(sample.bits_per_sample(), 16);
        assert_eq!(sample.frames(), 1000);
        assert!((sample.data()[0] - 0.5).abs() < 0.001);
        assert_eq!(loader.total_memory_usage(), 2000 * 4);
    }

    #[test]
    fn test_load_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.wav");
        write_wav(&path, 1, 10);

        let mut loader = SampleLoader::new();
        let first = loader.load(&path).unwrap();
        let second = loader.load(&path).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.wav");

        let mut loader = SampleLoader::new();
        let err = loader.load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.wav"));
        assert!(loader.is_empty());
    }
}
