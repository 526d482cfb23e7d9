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
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use super::{AudioError, BusId, Levels, OperationSet, VoiceId};
use crate::samples::SampleBuffer;

/// A backend call, as recorded by the mock.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateSubmix {
        bus: BusId,
        parent: Option<BusId>,
    },
    DestroySubmix(BusId),
    CreateVoice {
        voice: VoiceId,
        bus: BusId,
    },
    DestroyVoice(VoiceId),
    Submit(VoiceId),
    SetFrequencyRatio {
        voice: VoiceId,
        ratio: f32,
        operation_set: OperationSet,
    },
    SetVolume {
        voice: VoiceId,
        amplitude: f32,
        operation_set: OperationSet,
    },
    Start {
        voice: VoiceId,
        operation_set: OperationSet,
    },
    Commit(OperationSet),
    SetBusVolume {
        bus: BusId,
        amplitude: f32,
    },
    SetChannelVolumes {
        bus: BusId,
        left: f32,
        right: f32,
    },
    SetMasterVolume(f32),
}

#[derive(Default)]
struct State {
    next_id: u64,
    /// Live voices with their bus and queued buffer count.
    voices: HashMap<VoiceId, (BusId, usize)>,
    buses: HashSet<BusId>,
    calls: Vec<Call>,
}

/// A mock backend. Doesn't actually play anything, but records every call in order and
/// tracks which voices are busy.
pub struct Backend {
    name: String,
    /// Whether calls are recorded.
    recording: bool,
    /// Whether queued buffers are released as soon as their operation set is committed.
    auto_release: Mutex<bool>,
    state: Mutex<State>,
}

impl Backend {
    /// Creates a recording mock. Submitted buffers stay queued until released.
    pub fn new(name: &str) -> Backend {
        Backend {
            name: name.to_string(),
            recording: true,
            auto_release: Mutex::new(false),
            state: Mutex::new(State::default()),
        }
    }

    /// Creates a non-recording mock that releases voices on commit, for long-running use.
    pub fn quiet(name: &str) -> Backend {
        Backend {
            name: name.to_string(),
            recording: false,
            auto_release: Mutex::new(true),
            state: Mutex::new(State::default()),
        }
    }

    /// Creates a recording mock wrapped in an Arc.
    pub fn shared(name: &str) -> Arc<Backend> {
        Arc::new(Backend::new(name))
    }

    /// Sets whether voices are released on commit.
    pub fn set_auto_release(&self, auto_release: bool) {
        *self.auto_release.lock() = auto_release;
    }

    /// Returns a copy of the recorded calls.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Clears the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Marks the voice as having finished its buffer.
    pub fn release(&self, voice: VoiceId) {
        if let Some((_, queued)) = self.state.lock().voices.get_mut(&voice) {
            *queued = 0;
        }
    }

    /// Marks every voice as idle.
    pub fn release_all(&self) {
        self.state
            .lock()
            .voices
            .values_mut()
            .for_each(|(_, queued)| *queued = 0);
    }

    /// Returns the bus a live voice is routed to.
    pub fn voice_bus(&self, voice: VoiceId) -> Option<BusId> {
        self.state.lock().voices.get(&voice).map(|(bus, _)| *bus)
    }

    /// Returns the number of live voices.
    pub fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Returns the number of live buses.
    pub fn bus_count(&self) -> usize {
        self.state.lock().buses.len()
    }

    /// Returns true if the bus is live.
    pub fn has_bus(&self, bus: BusId) -> bool {
        self.state.lock().buses.contains(&bus)
    }

    /// Returns the recorded starts of live voices routed to the given bus, as
    /// (call index, operation set) pairs.
    pub fn starts_on(&self, bus: BusId) -> Vec<(usize, OperationSet)> {
        let state = self.state.lock();
        let voices: HashSet<VoiceId> = state
            .voices
            .iter()
            .filter(|(_, (b, _))| *b == bus)
            .map(|(voice, _)| *voice)
            .collect();
        state
            .calls
            .iter()
            .enumerate()
            .filter_map(|(index, call)| match call {
                Call::Start {
                    voice,
                    operation_set,
                } if voices.contains(voice) => Some((index, *operation_set)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, state: &mut State, call: Call) {
        if self.recording {
            state.calls.push(call);
        }
    }
}

impl super::Backend for Backend {
    fn create_submix(&self, parent: Option<BusId>) -> Result<BusId, AudioError> {
        let mut state = self.state.lock();
        if let Some(parent) = parent {
            if !state.buses.contains(&parent) {
                return Err(AudioError::UnknownBus(parent));
            }
        }
        state.next_id += 1;
        let bus = BusId(state.next_id);
        state.buses.insert(bus);
        self.record(&mut state, Call::CreateSubmix { bus, parent });
        Ok(bus)
    }

    fn destroy_submix(&self, bus: BusId) {
        let mut state = self.state.lock();
        if state.buses.remove(&bus) {
            self.record(&mut state, Call::DestroySubmix(bus));
        }
    }

    fn create_voice(&self, _: &SampleBuffer, bus: BusId) -> Result<VoiceId, AudioError> {
        let mut state = self.state.lock();
        if !state.buses.contains(&bus) {
            return Err(AudioError::UnknownBus(bus));
        }
        state.next_id += 1;
        let voice = VoiceId(state.next_id);
        state.voices.insert(voice, (bus, 0));
        self.record(&mut state, Call::CreateVoice { voice, bus });
        Ok(voice)
    }

    fn destroy_voice(&self, voice: VoiceId) {
        let mut state = self.state.lock();
        if state.voices.remove(&voice).is_some() {
            self.record(&mut state, Call::DestroyVoice(voice));
        }
    }

    fn submit(&self, voice: VoiceId, _: &Arc<SampleBuffer>) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        match state.voices.get_mut(&voice) {
            Some((_, queued)) => *queued += 1,
            None => return Err(AudioError::UnknownVoice(voice)),
        }
        self.record(&mut state, Call::Submit(voice));
        Ok(())
    }

    fn set_frequency_ratio(&self, voice: VoiceId, ratio: f32, operation_set: OperationSet) {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            Call::SetFrequencyRatio {
                voice,
                ratio,
                operation_set,
            },
        );
    }

    fn set_volume(&self, voice: VoiceId, amplitude: f32, operation_set: OperationSet) {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            Call::SetVolume {
                voice,
                amplitude,
                operation_set,
            },
        );
    }

    fn start(&self, voice: VoiceId, operation_set: OperationSet) {
        let mut state = self.state.lock();
        self.record(
            &mut state,
            Call::Start {
                voice,
                operation_set,
            },
        );
    }

    fn queued_buffers(&self, voice: VoiceId) -> usize {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map(|(_, queued)| *queued)
            .unwrap_or(0)
    }

    fn commit(&self, operation_set: OperationSet) {
        let auto_release = *self.auto_release.lock();
        let mut state = self.state.lock();
        if auto_release {
            state.voices.values_mut().for_each(|(_, queued)| *queued = 0);
        }
        self.record(&mut state, Call::Commit(operation_set));
    }

    fn set_bus_volume(&self, bus: BusId, amplitude: f32) {
        let mut state = self.state.lock();
        self.record(&mut state, Call::SetBusVolume { bus, amplitude });
    }

    fn set_channel_volumes(&self, bus: BusId, left: f32, right: f32) {
        let mut state = self.state.lock();
        self.record(&mut state, Call::SetChannelVolumes { bus, left, right });
    }

    fn set_master_volume(&self, amplitude: f32) {
        debug!(device = %self.name, amplitude, "Setting master volume (mock).");
        let mut state = self.state.lock();
        self.record(&mut state, Call::SetMasterVolume(amplitude));
    }

    fn levels(&self) -> Levels {
        Levels::default()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Backend as _;

    #[test]
    fn test_voice_busy_until_released() {
        let backend = Backend::new("mock");
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.0; 4], 1, 44100));
        let bus = backend.create_submix(None).unwrap();
        let voice = backend.create_voice(&sample, bus).unwrap();

        assert_eq!(backend.queued_buffers(voice), 0);
        backend.submit(voice, &sample).unwrap();
        assert_eq!(backend.queued_buffers(voice), 1);
        backend.commit(1);
        assert_eq!(backend.queued_buffers(voice), 1);

        backend.release(voice);
        assert_eq!(backend.queued_buffers(voice), 0);
    }

    #[test]
    fn test_auto_release_on_commit() {
        let backend = Backend::quiet("mock");
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.0; 4], 1, 44100));
        let bus = backend.create_submix(None).unwrap();
        let voice = backend.create_voice(&sample, bus).unwrap();

        backend.submit(voice, &sample).unwrap();
        backend.commit(1);
        assert_eq!(backend.queued_buffers(voice), 0);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_unknown_handles() {
        let backend = Backend::new("mock");
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.0; 4], 1, 44100));

        assert!(backend.create_voice(&sample, BusId(42)).is_err());
        assert!(backend.create_submix(Some(BusId(42))).is_err());
        assert!(backend.submit(VoiceId(42), &sample).is_err());

        // Destroying unknown handles is silently ignored.
        backend.destroy_voice(VoiceId(42));
        backend.destroy_submix(BusId(42));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_starts_on_bus() {
        let backend = Backend::new("mock");
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.0; 4], 1, 44100));
        let a = backend.create_submix(None).unwrap();
        let b = backend.create_submix(None).unwrap();
        let voice_a = backend.create_voice(&sample, a).unwrap();
        let voice_b = backend.create_voice(&sample, b).unwrap();

        backend.start(voice_b, 3);
        backend.start(voice_a, 4);

        assert_eq!(backend.starts_on(a), vec![(5, 4)]);
        assert_eq!(backend.starts_on(b), vec![(4, 3)]);
        assert_eq!(backend.voice_bus(voice_a), Some(a));
    }
}
