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
    error::Error,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use tracing::{debug, info};

use crate::audio::{AudioContext, BusId, OperationSet};
use crate::params::PlaybackParameters;
use crate::samples::SampleBuffer;
use crate::sequence::TickRate;
use crate::voices::VoicePool;

/// Frequency ratio of the accented click on the quarter note.
pub const ACCENT_RATIO: f32 = 1.0;

/// Frequency ratio of the clicks between quarter notes.
pub const NORMAL_RATIO: f32 = 0.75;

/// A click track driven by the scheduler's tick cadence. Clicks on every quarter note,
/// accented, plus every tick of the configured subdivision.
pub struct Metronome {
    /// The metronome bus, a child of the master output. Also the pool's output bus.
    bus: BusId,
    pool: Arc<VoicePool>,
    params: PlaybackParameters,
    active: AtomicBool,
    /// Ticks per quarter note of the click subdivision.
    frequency: AtomicUsize,
    ctx: AudioContext,
}

impl Metronome {
    /// Creates an inactive metronome clicking on quarter notes.
    pub fn new(
        ctx: &AudioContext,
        sample: Arc<SampleBuffer>,
    ) -> Result<Metronome, Box<dyn Error>> {
        let bus = ctx.backend().create_submix(None)?;
        let pool = match ctx.create_pool("metronome", sample, bus) {
            Ok(pool) => pool,
            Err(e) => {
                ctx.backend().destroy_submix(bus);
                return Err(e.into());
            }
        };
        info!(bus = bus.0, "Created metronome");
        Ok(Metronome {
            bus,
            pool,
            params: PlaybackParameters::new(),
            active: AtomicBool::new(false),
            frequency: AtomicUsize::new(TickRate::Quarter.ticks_per_quarter()),
            ctx: ctx.clone(),
        })
    }

    /// Clicks if the metronome is active and the subtick position is on the quarter note
    /// or one of the subdivision's ticks. Returns true if a click was played.
    pub fn play(&self, position: usize, operation_set: OperationSet) -> bool {
        if !self.is_active() || !self.params.is_audible() {
            return false;
        }
        let ratio = if position == 0 {
            ACCENT_RATIO
        } else if self.frequency().contains(position) {
            NORMAL_RATIO
        } else {
            return false;
        };

        match self
            .pool
            .play(1.0, ratio * self.params.pitch_ratio(), operation_set)
        {
            Ok(_) => true,
            Err(e) => {
                debug!(err = %e, position, "Metronome click failed");
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Returns the click subdivision.
    pub fn frequency(&self) -> TickRate {
        TickRate::from_ticks(self.frequency.load(Ordering::Acquire)).unwrap_or(TickRate::Quarter)
    }

    /// Sets the click subdivision by ticks per quarter note. The metronome supports
    /// quarters, eighths, eighth triplets and sixteenths; anything else becomes quarters.
    /// Returns the subdivision used.
    pub fn set_frequency(&self, ticks: usize) -> TickRate {
        let rate = match TickRate::from_ticks(ticks) {
            Some(TickRate::ThirtySecond) | None => TickRate::Quarter,
            Some(rate) => rate,
        };
        self.frequency.store(rate.ticks_per_quarter(), Ordering::Release);
        rate
    }

    /// Sets the metronome volume and pushes it to the metronome bus.
    pub fn set_volume(&self, db: f32) -> bool {
        let changed = self.params.set_volume(db);
        if changed {
            self.ctx.backend().set_bus_volume(self.bus, self.params.amplitude());
        }
        changed
    }

    pub fn params(&self) -> &PlaybackParameters {
        &self.params
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn pool(&self) -> &Arc<VoicePool> {
        &self.pool
    }

    /// Releases the pool and the metronome bus.
    pub fn teardown(&self) {
        self.ctx.registry().shutdown(&self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{self, Call};
    use crate::voices::PoolConfig;

    fn setup() -> (Arc<mock::Backend>, Metronome) {
        let backend = mock::Backend::shared("mock");
        backend.set_auto_release(true);
        let ctx = AudioContext::new(backend.clone(), PoolConfig::default());
        let sample = Arc::new(SampleBuffer::from_samples(vec![0.5; 8], 1, 44100));
        let metronome = Metronome::new(&ctx, sample).unwrap();
        (backend, metronome)
    }

    fn ratios(backend: &mock::Backend) -> Vec<f32> {
        backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SetFrequencyRatio { ratio, .. } => Some(ratio),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_inactive_metronome_is_silent() {
        let (backend, metronome) = setup();
        assert!(!metronome.play(0, 1));
        assert!(ratios(&backend).is_empty());
    }

    #[test]
    fn test_accents_quarter_note() {
        let (backend, metronome) = setup();
        metronome.set_active(true);
        assert_eq!(metronome.set_frequency(2), TickRate::Eighth);

        let played: Vec<usize> = (0..24)
            .filter(|position| metronome.play(*position, 1))
            .collect();
        assert_eq!(played, vec![0, 12]);
        assert_eq!(ratios(&backend), vec![ACCENT_RATIO, NORMAL_RATIO]);
    }

    #[test]
    fn test_unsupported_frequency_falls_back() {
        let (_, metronome) = setup();
        assert_eq!(metronome.set_frequency(4), TickRate::Sixteenth);
        assert_eq!(metronome.set_frequency(8), TickRate::Quarter);
        assert_eq!(metronome.set_frequency(7), TickRate::Quarter);
        assert_eq!(metronome.set_frequency(3), TickRate::EighthTriplet);
        assert_eq!(metronome.frequency(), TickRate::EighthTriplet);
    }

    #[test]
    fn test_teardown_releases_bus() {
        let (backend, metronome) = setup();
        let bus = metronome.bus();
        metronome.teardown();
        assert!(!backend.has_bus(bus));
        assert_eq!(backend.voice_count(), 0);
        assert!(!metronome.play(0, 1));
    }
}
