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
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::PoolError;
use crate::audio::{Backend, BusId, OperationSet, VoiceId};
use crate::samples::SampleBuffer;

/// Global pool ID counter.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct PoolState {
    /// Voices in creation order. Never shrinks while the pool is alive.
    voices: Vec<VoiceId>,
    /// The highest voice index that has ever played.
    high_water: Option<usize>,
    /// The number of times the pool has grown.
    increase_count: usize,
    destroyed: bool,
}

/// A growable set of voices bound to one sample and one output bus.
pub struct VoicePool {
    /// Unique ID for this pool.
    id: u64,
    /// The name of the pool, usually the instrument name.
    name: String,
    sample: Arc<SampleBuffer>,
    /// The bus every voice in the pool is routed to.
    bus: BusId,
    /// The number of voices added when every voice is busy.
    grow_by: usize,
    backend: Arc<dyn Backend>,
    state: Mutex<PoolState>,
    /// Whether the output bus has been released.
    output_destroyed: AtomicBool,
}

impl VoicePool {
    /// Creates a pool with `size` voices. Only the registry creates pools.
    pub(super) fn new(
        name: &str,
        backend: Arc<dyn Backend>,
        sample: Arc<SampleBuffer>,
        bus: BusId,
        size: usize,
        grow_by: usize,
    ) -> Result<VoicePool, PoolError> {
        let pool = VoicePool {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            sample,
            bus,
            grow_by: grow_by.max(1),
            backend,
            state: Mutex::new(PoolState {
                voices: Vec::with_capacity(size),
                high_water: None,
                increase_count: 0,
                destroyed: false,
            }),
            output_destroyed: AtomicBool::new(false),
        };

        {
            let mut state = pool.state.lock();
            if let Err(e) = pool.add_voices(&mut state.voices, size) {
                // Release whatever was created before the failure.
                state
                    .voices
                    .drain(..)
                    .for_each(|voice| pool.backend.destroy_voice(voice));
                return Err(e);
            }
        }

        debug!(
            pool = %pool.name,
            id = pool.id,
            size,
            bus = pool.bus.0,
            "Created voice pool"
        );
        Ok(pool)
    }

    fn add_voices(&self, voices: &mut Vec<VoiceId>, count: usize) -> Result<(), PoolError> {
        for _ in 0..count {
            let voice = self
                .backend
                .create_voice(&self.sample, self.bus)
                .map_err(|source| PoolError::Voice {
                    pool: self.name.clone(),
                    source,
                })?;
            voices.push(voice);
        }
        Ok(())
    }

    /// Plays the pool's sample on the first idle voice, growing the pool if every voice is
    /// busy. The volume, frequency ratio and start are tagged with the operation set, so
    /// nothing is heard until the backend commits it. Returns the index of the voice used.
    pub fn play(
        &self,
        amplitude: f32,
        ratio: f32,
        operation_set: OperationSet,
    ) -> Result<usize, PoolError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(PoolError::Destroyed(self.name.clone()));
        }

        let index = match state
            .voices
            .iter()
            .position(|voice| self.backend.queued_buffers(*voice) == 0)
        {
            Some(index) => index,
            None => {
                let index = state.voices.len();
                self.add_voices(&mut state.voices, self.grow_by)?;
                state.increase_count += 1;
                warn!(
                    pool = %self.name,
                    size = state.voices.len(),
                    increase_count = state.increase_count,
                    high_water = state.high_water,
                    "All voices busy, grew voice pool"
                );
                index
            }
        };

        let voice = state.voices[index];
        self.backend
            .submit(voice, &self.sample)
            .map_err(|source| PoolError::Play {
                pool: self.name.clone(),
                source,
            })?;
        self.backend.set_frequency_ratio(voice, ratio, operation_set);
        self.backend.set_volume(voice, amplitude, operation_set);
        self.backend.start(voice, operation_set);

        state.high_water = Some(state.high_water.map_or(index, |high| high.max(index)));
        Ok(index)
    }

    /// Releases every voice. Safe to call more than once.
    pub(super) fn destroy_voices(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        let count = state.voices.len();
        state
            .voices
            .drain(..)
            .for_each(|voice| self.backend.destroy_voice(voice));
        debug!(
            pool = %self.name,
            id = self.id,
            voices = count,
            high_water = state.high_water,
            increase_count = state.increase_count,
            "Destroyed voice pool"
        );
    }

    /// Releases the output bus. Safe to call more than once.
    pub(super) fn destroy_output_voice(&self) {
        if !self.output_destroyed.swap(true, Ordering::SeqCst) {
            self.backend.destroy_submix(self.bus);
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bus the pool's voices are routed to.
    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn sample(&self) -> &Arc<SampleBuffer> {
        &self.sample
    }

    /// Returns the number of voices. Zero once destroyed.
    pub fn size(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Returns the highest voice index that has played, if any has.
    pub fn high_water(&self) -> Option<usize> {
        self.state.lock().high_water
    }

    /// Returns the number of times the pool has grown.
    pub fn increase_count(&self) -> usize {
        self.state.lock().increase_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Returns the voice at the given index.
    pub fn voice(&self, index: usize) -> Option<VoiceId> {
        self.state.lock().voices.get(index).copied()
    }
}

impl fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoicePool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{self, Call};
    use crate::voices::{PoolConfig, VoicePoolRegistry};

    fn setup() -> (Arc<mock::Backend>, VoicePoolRegistry, Arc<SampleBuffer>, BusId) {
        let backend = mock::Backend::shared("mock");
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.5; 16], 1, 44100));
        let bus = backend.create_submix(None).unwrap();
        (backend, VoicePoolRegistry::new(), sample, bus)
    }

    #[test]
    fn test_create_clamps_size() {
        let (backend, registry, sample, bus) = setup();
        let config = PoolConfig::default();

        let small = registry
            .create("small", backend.clone(), sample.clone(), bus, 2, &config)
            .unwrap();
        let large = registry
            .create("large", backend.clone(), sample, bus, 500, &config)
            .unwrap();

        assert_eq!(small.size(), 16);
        assert_eq!(large.size(), 48);
        assert_eq!(backend.voice_count(), 64);
        assert_eq!(small.high_water(), None);
    }

    #[test]
    fn test_play_uses_first_idle_voice() {
        let (backend, registry, sample, bus) = setup();
        let pool = registry
            .create("kick", backend.clone(), sample, bus, 16, &PoolConfig::default())
            .unwrap();

        assert_eq!(pool.play(1.0, 1.0, 1).unwrap(), 0);
        assert_eq!(pool.play(1.0, 1.0, 1).unwrap(), 1);
        assert_eq!(pool.play(1.0, 1.0, 2).unwrap(), 2);

        // Freeing voice 1 makes it the first idle voice again.
        backend.release(pool.voice(1).unwrap());
        assert_eq!(pool.play(1.0, 1.0, 3).unwrap(), 1);
        assert_eq!(pool.high_water(), Some(2));
        assert_eq!(pool.increase_count(), 0);
    }

    #[test]
    fn test_play_tags_operation_set() {
        let (backend, registry, sample, bus) = setup();
        let pool = registry
            .create("snare", backend.clone(), sample, bus, 16, &PoolConfig::default())
            .unwrap();
        backend.clear_calls();

        pool.play(0.5, 2.0, 9).unwrap();
        let voice = pool.voice(0).unwrap();
        assert_eq!(
            backend.calls(),
            vec![
                Call::Submit(voice),
                Call::SetFrequencyRatio {
                    voice,
                    ratio: 2.0,
                    operation_set: 9
                },
                Call::SetVolume {
                    voice,
                    amplitude: 0.5,
                    operation_set: 9
                },
                Call::Start {
                    voice,
                    operation_set: 9
                },
            ]
        );
    }

    #[test]
    fn test_pool_grows_when_exhausted() {
        let (backend, registry, sample, bus) = setup();
        let pool = registry
            .create("crash", backend, sample, bus, 16, &PoolConfig::default())
            .unwrap();

        for expected in 0..16 {
            assert_eq!(pool.play(1.0, 1.0, 1).unwrap(), expected);
        }
        assert_eq!(pool.play(1.0, 1.0, 2).unwrap(), 16);
        assert_eq!(pool.size(), 22);
        assert_eq!(pool.increase_count(), 1);
        assert_eq!(pool.high_water(), Some(16));
    }

    #[test]
    fn test_pool_never_drops_a_note() {
        let (backend, registry, sample, bus) = setup();
        let pool = registry
            .create("ride", backend.clone(), sample, bus, 16, &PoolConfig::default())
            .unwrap();

        let mut last_size = pool.size();
        for i in 0..200 {
            assert!(pool.play(1.0, 1.0, i + 1).is_ok());
            // Every third tick some voices finish playing.
            if i % 3 == 0 {
                backend.release(pool.voice(i as usize % pool.size()).unwrap());
            }
            assert!(pool.size() >= last_size);
            last_size = pool.size();
        }
        assert!(pool.size() >= 16);
        assert!(pool.high_water().unwrap() < pool.size());
    }

    #[test]
    fn test_destroyed_pool_rejects_play() {
        let (backend, registry, sample, bus) = setup();
        let pool = registry
            .create("tom", backend.clone(), sample, bus, 16, &PoolConfig::default())
            .unwrap();

        registry.destroy(&pool);
        assert!(pool.is_destroyed());
        assert_eq!(pool.size(), 0);
        assert_eq!(backend.voice_count(), 0);
        assert!(matches!(
            pool.play(1.0, 1.0, 1),
            Err(PoolError::Destroyed(_))
        ));
    }

    #[test]
    fn test_create_fails_on_unknown_bus() {
        let (backend, registry, sample, _) = setup();
        let result = registry.create(
            "ghost",
            backend.clone(),
            sample,
            BusId(999),
            16,
            &PoolConfig::default(),
        );
        assert!(matches!(result, Err(PoolError::Voice { .. })));
        assert!(registry.is_empty());
        assert_eq!(backend.voice_count(), 0);
    }
}
