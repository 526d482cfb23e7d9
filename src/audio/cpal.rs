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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SizedSample,
};
use tracing::{error, info};

use super::{mixer::Mixer, AudioError, Backend as _, BusId, Levels, OperationSet, VoiceId};
use crate::samples::SampleBuffer;

/// An output device backed by cpal. Voices are mixed in software by a [`Mixer`] that the
/// device's stream callback pulls from.
pub struct Backend {
    /// The name of the device.
    name: String,
    /// The number of output channels the stream was opened with.
    channels: u16,
    mixer: Arc<Mixer>,
    /// Tells the output thread to drop the stream and exit.
    closing: Arc<AtomicBool>,
    /// Handle to the output thread (keeps the stream alive).
    output_thread: Option<thread::JoinHandle<()>>,
}

impl Backend {
    /// Opens the named output device, or the host's default output device if no name is
    /// given, and starts streaming silence.
    pub fn open(name: Option<&str>) -> Result<Backend, AudioError> {
        let host = cpal::default_host();
        let device = match name {
            Some(name) => host
                .output_devices()
                .map_err(|e| AudioError::Device(e.to_string()))?
                .find(|device| {
                    device
                        .name()
                        .map(|device_name| device_name.trim() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))?,
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?,
        };
        let device_name = device
            .name()
            .map_err(|e| AudioError::Device(e.to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels;
        let mixer = Arc::new(Mixer::new(config.sample_rate.0));
        let closing = Arc::new(AtomicBool::new(false));

        // The stream is created and dropped on the output thread since cpal streams are
        // not Send on every platform.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), AudioError>>(1);
        let output_thread = {
            let mixer = mixer.clone();
            let closing = closing.clone();
            thread::Builder::new()
                .name("tambala-output".to_string())
                .spawn(move || {
                    let stream = match sample_format {
                        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer),
                        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer),
                        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer),
                        other => Err(AudioError::Unsupported(format!(
                            "sample format {:?}",
                            other
                        ))),
                    };
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
                        return;
                    }
                    info!("CPAL output stream started successfully");
                    let _ = ready_tx.send(Ok(()));

                    while !closing.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = output_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = output_thread.join();
                return Err(AudioError::Device(
                    "output thread exited before the stream started".to_string(),
                ));
            }
        }

        info!(
            device = %device_name,
            channels,
            sample_rate = mixer.sample_rate(),
            "Opened output device"
        );

        Ok(Backend {
            name: device_name,
            channels,
            mixer,
            closing,
            output_thread: Some(output_thread),
        })
    }
}

/// Builds an output stream of the given sample type that renders from the mixer.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mixer>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch, channels);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            |err| error!("CPAL output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))
}

/// Lists the names of the output devices on every available host.
pub fn list_devices() -> Result<Vec<String>, AudioError> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut names = Vec::new();
    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to open host"
                );
                continue;
            }
        };
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };
        names.extend(devices.filter_map(|device| device.name().ok()));
    }

    names.sort();
    names.dedup();
    Ok(names)
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Relaxed);
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Channels={})", self.name, self.channels)
    }
}

impl super::Backend for Backend {
    fn create_submix(&self, parent: Option<BusId>) -> Result<BusId, AudioError> {
        self.mixer.create_submix(parent)
    }

    fn destroy_submix(&self, bus: BusId) {
        self.mixer.destroy_submix(bus)
    }

    fn create_voice(&self, sample: &SampleBuffer, bus: BusId) -> Result<VoiceId, AudioError> {
        self.mixer.create_voice(sample, bus)
    }

    fn destroy_voice(&self, voice: VoiceId) {
        self.mixer.destroy_voice(voice)
    }

    fn submit(&self, voice: VoiceId, sample: &Arc<SampleBuffer>) -> Result<(), AudioError> {
        self.mixer.submit(voice, sample)
    }

    fn set_frequency_ratio(&self, voice: VoiceId, ratio: f32, operation_set: OperationSet) {
        self.mixer.set_frequency_ratio(voice, ratio, operation_set)
    }

    fn set_volume(&self, voice: VoiceId, amplitude: f32, operation_set: OperationSet) {
        self.mixer.set_volume(voice, amplitude, operation_set)
    }

    fn start(&self, voice: VoiceId, operation_set: OperationSet) {
        self.mixer.start(voice, operation_set)
    }

    fn queued_buffers(&self, voice: VoiceId) -> usize {
        self.mixer.queued_buffers(voice)
    }

    fn commit(&self, operation_set: OperationSet) {
        self.mixer.commit(operation_set)
    }

    fn set_bus_volume(&self, bus: BusId, amplitude: f32) {
        self.mixer.set_bus_volume(bus, amplitude)
    }

    fn set_channel_volumes(&self, bus: BusId, left: f32, right: f32) {
        self.mixer.set_channel_volumes(bus, left, right)
    }

    fn set_master_volume(&self, amplitude: f32) {
        self.mixer.set_master_volume(amplitude)
    }

    fn levels(&self) -> Levels {
        self.mixer.levels()
    }
}
