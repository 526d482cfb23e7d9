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
// Software voice mixer that can be driven by both CPAL and test implementations
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use super::{AudioError, BusId, Levels, OperationSet, VoiceId, COMMIT_NOW};
use crate::samples::SampleBuffer;

/// Buses nested deeper than this are treated as feeding the master directly.
const MAX_BUS_DEPTH: usize = 16;

/// A voice inside the mixer.
struct Voice {
    bus: BusId,
    /// Buffers waiting to play. The front buffer is the one playing.
    queue: VecDeque<Arc<SampleBuffer>>,
    /// Fractional read position in the front buffer, in source frames.
    position: f64,
    ratio: f32,
    volume: f32,
    playing: bool,
}

impl Voice {
    /// Reads the next interpolated frame and advances, moving on to the next queued buffer
    /// when the current one runs out. Returns None once the queue is empty.
    fn next_frame(&mut self, output_rate: u32) -> Option<(f32, f32)> {
        loop {
            let buffer = self.queue.front()?;
            let step =
                self.ratio.max(0.0) as f64 * buffer.sample_rate() as f64 / output_rate as f64;
            let index = self.position.floor() as usize;
            if index >= buffer.frames() || step <= 0.0 {
                self.queue.pop_front();
                self.position = 0.0;
                continue;
            }

            let frac = (self.position - index as f64) as f32;
            let (l0, r0) = buffer.stereo_frame(index);
            let (l1, r1) = buffer.stereo_frame(index + 1);
            self.position += step;
            return Some((l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac));
        }
    }
}

struct Bus {
    parent: Option<BusId>,
    volume: f32,
    left: f32,
    right: f32,
}

/// A deferred voice change, applied when its operation set is committed.
enum Pending {
    Ratio(VoiceId, f32),
    Volume(VoiceId, f32),
    Start(VoiceId),
}

struct State {
    next_id: u64,
    voices: HashMap<VoiceId, Voice>,
    buses: HashMap<BusId, Bus>,
    pending: Vec<(OperationSet, Pending)>,
    master: f32,
}

impl State {
    fn apply(&mut self, op: Pending) {
        match op {
            Pending::Ratio(voice, ratio) => {
                if let Some(voice) = self.voices.get_mut(&voice) {
                    voice.ratio = ratio;
                }
            }
            Pending::Volume(voice, volume) => {
                if let Some(voice) = self.voices.get_mut(&voice) {
                    voice.volume = volume;
                }
            }
            Pending::Start(voice) => {
                if let Some(voice) = self.voices.get_mut(&voice) {
                    voice.playing = !voice.queue.is_empty();
                }
            }
        }
    }

    fn defer(&mut self, operation_set: OperationSet, op: Pending) {
        if operation_set == COMMIT_NOW {
            self.apply(op);
        } else {
            self.pending.push((operation_set, op));
        }
    }
}

/// Left/right gain of a bus chain, or None if a bus in the chain no longer exists.
fn bus_gain(buses: &HashMap<BusId, Bus>, bus: BusId) -> Option<(f32, f32)> {
    let (mut left, mut right) = (1.0, 1.0);
    let mut current = Some(bus);
    for _ in 0..MAX_BUS_DEPTH {
        let Some(id) = current else {
            break;
        };
        let bus = buses.get(&id)?;
        left *= bus.volume * bus.left;
        right *= bus.volume * bus.right;
        current = bus.parent;
    }
    Some((left, right))
}

/// Mixes voices through a tree of submix buses into an interleaved output buffer.
///
/// Voices are resampled to the output rate with linear interpolation, scaled by their
/// frequency ratio. Only the first two output channels carry audio.
pub struct Mixer {
    sample_rate: u32,
    state: Mutex<State>,
    peak_left: AtomicU32,
    peak_right: AtomicU32,
}

impl Mixer {
    /// Creates a mixer rendering at the given sample rate.
    pub fn new(sample_rate: u32) -> Mixer {
        Mixer {
            sample_rate: sample_rate.max(1),
            state: Mutex::new(State {
                next_id: 0,
                voices: HashMap::new(),
                buses: HashMap::new(),
                pending: Vec::new(),
                master: 1.0,
            }),
            peak_left: AtomicU32::new(0.0f32.to_bits()),
            peak_right: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of live voices.
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Renders interleaved frames into the output buffer, overwriting it.
    pub fn render(&self, output: &mut [f32], channels: usize) {
        output.fill(0.0);
        if channels == 0 {
            return;
        }
        let frames = output.len() / channels;

        let mut state = self.state.lock();
        let State {
            voices,
            buses,
            master,
            ..
        } = &mut *state;
        let master = *master;

        for voice in voices.values_mut().filter(|voice| voice.playing) {
            let Some((bus_left, bus_right)) = bus_gain(buses, voice.bus) else {
                continue;
            };
            let gain_left = bus_left * voice.volume * master;
            let gain_right = bus_right * voice.volume * master;

            for frame in 0..frames {
                let Some((left, right)) = voice.next_frame(self.sample_rate) else {
                    break;
                };
                let out = &mut output[frame * channels..(frame + 1) * channels];
                if channels == 1 {
                    out[0] += (left * gain_left + right * gain_right) * 0.5;
                } else {
                    out[0] += left * gain_left;
                    out[1] += right * gain_right;
                }
            }
            if voice.queue.is_empty() {
                voice.playing = false;
            }
        }
        drop(state);

        let (mut peak_left, mut peak_right) = (0.0f32, 0.0f32);
        for frame in output.chunks(channels) {
            peak_left = peak_left.max(frame[0].abs());
            peak_right = peak_right.max(frame.get(1).unwrap_or(&frame[0]).abs());
        }
        self.peak_left.store(peak_left.to_bits(), Ordering::Relaxed);
        self.peak_right.store(peak_right.to_bits(), Ordering::Relaxed);
    }
}

impl super::Backend for Mixer {
    fn create_submix(&self, parent: Option<BusId>) -> Result<BusId, AudioError> {
        let mut state = self.state.lock();
        if let Some(parent) = parent {
            if !state.buses.contains_key(&parent) {
                return Err(AudioError::UnknownBus(parent));
            }
        }
        state.next_id += 1;
        let bus = BusId(state.next_id);
        state.buses.insert(
            bus,
            Bus {
                parent,
                volume: 1.0,
                left: 1.0,
                right: 1.0,
            },
        );
        Ok(bus)
    }

    fn destroy_submix(&self, bus: BusId) {
        self.state.lock().buses.remove(&bus);
    }

    fn create_voice(&self, _: &SampleBuffer, bus: BusId) -> Result<VoiceId, AudioError> {
        let mut state = self.state.lock();
        if !state.buses.contains_key(&bus) {
            return Err(AudioError::UnknownBus(bus));
        }
        state.next_id += 1;
        let voice = VoiceId(state.next_id);
        state.voices.insert(
            voice,
            Voice {
                bus,
                queue: VecDeque::new(),
                position: 0.0,
                ratio: 1.0,
                volume: 1.0,
                playing: false,
            },
        );
        Ok(voice)
    }

    fn destroy_voice(&self, voice: VoiceId) {
        let mut state = self.state.lock();
        state.voices.remove(&voice);
        state.pending.retain(|(_, op)| match op {
            Pending::Ratio(id, _) | Pending::Volume(id, _) | Pending::Start(id) => *id != voice,
        });
    }

    fn submit(&self, voice: VoiceId, sample: &Arc<SampleBuffer>) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        let voice = state
            .voices
            .get_mut(&voice)
            .ok_or(AudioError::UnknownVoice(voice))?;
        voice.queue.push_back(sample.clone());
        Ok(())
    }

    fn set_frequency_ratio(&self, voice: VoiceId, ratio: f32, operation_set: OperationSet) {
        self.state
            .lock()
            .defer(operation_set, Pending::Ratio(voice, ratio));
    }

    fn set_volume(&self, voice: VoiceId, amplitude: f32, operation_set: OperationSet) {
        self.state
            .lock()
            .defer(operation_set, Pending::Volume(voice, amplitude));
    }

    fn start(&self, voice: VoiceId, operation_set: OperationSet) {
        self.state
            .lock()
            .defer(operation_set, Pending::Start(voice));
    }

    fn queued_buffers(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map(|voice| voice.queue.len())
            .unwrap_or(0)
    }

    fn commit(&self, operation_set: OperationSet) {
        let mut state = self.state.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|(set, _)| *set == operation_set);
        state.pending = waiting;
        for (_, op) in ready {
            state.apply(op);
        }
    }

    fn set_bus_volume(&self, bus: BusId, amplitude: f32) {
        if let Some(bus) = self.state.lock().buses.get_mut(&bus) {
            bus.volume = amplitude;
        }
    }

    fn set_channel_volumes(&self, bus: BusId, left: f32, right: f32) {
        if let Some(bus) = self.state.lock().buses.get_mut(&bus) {
            bus.left = left;
            bus.right = right;
        }
    }

    fn set_master_volume(&self, amplitude: f32) {
        self.state.lock().master = amplitude;
    }

    fn levels(&self) -> Levels {
        Levels {
            left: f32::from_bits(self.peak_left.load(Ordering::Relaxed)),
            right: f32::from_bits(self.peak_right.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Display for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Software mixer ({} Hz)", self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Backend;

    fn sample(data: Vec<f32>) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::from_samples(data, 1, 48000))
    }

    fn render(mixer: &Mixer, frames: usize) -> Vec<f32> {
        let mut output = vec![0.0; frames * 2];
        mixer.render(&mut output, 2);
        output
    }

    #[test]
    fn test_start_waits_for_commit() {
        let mixer = Mixer::new(48000);
        let sample = sample(vec![0.5; 100]);
        let bus = mixer.create_submix(None).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.submit(voice, &sample).unwrap();
        mixer.set_volume(voice, 1.0, 7);
        mixer.start(voice, 7);
        assert_eq!(render(&mixer, 2), vec![0.0; 4]);

        // Committing a different set changes nothing.
        mixer.commit(8);
        assert_eq!(render(&mixer, 2), vec![0.0; 4]);

        mixer.commit(7);
        assert_eq!(render(&mixer, 2), vec![0.5; 4]);
    }

    #[test]
    fn test_commit_now_applies_immediately() {
        let mixer = Mixer::new(48000);
        let sample = sample(vec![0.5; 100]);
        let bus = mixer.create_submix(None).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.submit(voice, &sample).unwrap();
        mixer.start(voice, COMMIT_NOW);
        assert_eq!(render(&mixer, 1), vec![0.5, 0.5]);
    }

    #[test]
    fn test_bus_and_master_gain() {
        let mixer = Mixer::new(48000);
        let sample = sample(vec![1.0; 100]);
        let parent = mixer.create_submix(None).unwrap();
        let bus = mixer.create_submix(Some(parent)).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.set_bus_volume(parent, 0.5);
        mixer.set_channel_volumes(bus, 0.0, 1.0);
        mixer.set_master_volume(0.5);
        mixer.set_volume(voice, 0.5, COMMIT_NOW);
        mixer.submit(voice, &sample).unwrap();
        mixer.start(voice, COMMIT_NOW);

        assert_eq!(render(&mixer, 1), vec![0.0, 0.125]);
        let levels = mixer.levels();
        assert_eq!(levels.left, 0.0);
        assert_eq!(levels.right, 0.125);
    }

    #[test]
    fn test_voice_frees_when_buffer_ends() {
        let mixer = Mixer::new(48000);
        let sample = sample(vec![0.25; 4]);
        let bus = mixer.create_submix(None).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.submit(voice, &sample).unwrap();
        mixer.start(voice, COMMIT_NOW);
        assert_eq!(mixer.queued_buffers(voice), 1);

        let output = render(&mixer, 8);
        assert_eq!(output[6], 0.25);
        assert_eq!(output[8], 0.0);
        assert_eq!(mixer.queued_buffers(voice), 0);
    }

    #[test]
    fn test_frequency_ratio_steps_through_source() {
        let mixer = Mixer::new(48000);
        let sample = sample((0..8).map(|i| i as f32 / 10.0).collect());
        let bus = mixer.create_submix(None).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.submit(voice, &sample).unwrap();
        mixer.set_frequency_ratio(voice, 2.0, COMMIT_NOW);
        mixer.start(voice, COMMIT_NOW);

        let output = render(&mixer, 3);
        let left: Vec<f32> = output.chunks(2).map(|frame| frame[0]).collect();
        assert_eq!(left, vec![0.0, 0.2, 0.4]);
    }

    #[test]
    fn test_destroyed_bus_silences_voice() {
        let mixer = Mixer::new(48000);
        let sample = sample(vec![0.5; 100]);
        let bus = mixer.create_submix(None).unwrap();
        let voice = mixer.create_voice(&sample, bus).unwrap();

        mixer.submit(voice, &sample).unwrap();
        mixer.start(voice, COMMIT_NOW);
        mixer.destroy_submix(bus);
        assert_eq!(render(&mixer, 1), vec![0.0, 0.0]);

        mixer.destroy_voice(voice);
        assert_eq!(mixer.voice_count(), 0);
    }
}
