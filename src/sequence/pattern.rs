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
use std::{error::Error, fmt, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::timeline::{StepGrid, TickRate, Timeline};
use crate::audio::{AudioContext, BusId};
use crate::params::{apply_solo_group, ParameterSnapshot, PlaybackParameters};
use crate::samples::{Kit, SampleBuffer};
use crate::voices::VoicePool;

/// One instrument's lane in a pattern.
pub struct Track {
    instrument: String,
    /// The instrument bus, a child of the pattern bus. Also the pool's output bus.
    bus: BusId,
    pool: Arc<VoicePool>,
    params: PlaybackParameters,
    steps: StepGrid,
}

impl Track {
    fn new(
        ctx: &AudioContext,
        pattern_bus: BusId,
        instrument: &str,
        sample: Arc<SampleBuffer>,
    ) -> Result<Track, Box<dyn Error>> {
        let bus = ctx.backend().create_submix(Some(pattern_bus))?;
        let pool = match ctx.create_pool(instrument, sample, bus) {
            Ok(pool) => pool,
            Err(e) => {
                ctx.backend().destroy_submix(bus);
                return Err(e.into());
            }
        };
        let track = Track {
            instrument: instrument.to_string(),
            bus,
            pool,
            params: PlaybackParameters::new(),
            steps: StepGrid::new(),
        };
        track.push_volume(ctx);
        track.push_pan(ctx);
        Ok(track)
    }

    fn push_volume(&self, ctx: &AudioContext) {
        ctx.backend().set_bus_volume(self.bus, self.params.amplitude());
    }

    fn push_pan(&self, ctx: &AudioContext) {
        let (left, right) = self.params.gains();
        ctx.backend().set_channel_volumes(self.bus, left, right);
    }

    /// Releases the pool and the instrument bus.
    fn teardown(&self, ctx: &AudioContext) {
        ctx.registry().shutdown(&self.pool);
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    pub fn pool(&self) -> &Arc<VoicePool> {
        &self.pool
    }

    pub fn params(&self) -> &PlaybackParameters {
        &self.params
    }

    pub fn steps(&self) -> &StepGrid {
        &self.steps
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("instrument", &self.instrument)
            .field("bus", &self.bus)
            .field("steps", &self.steps)
            .finish()
    }
}

/// The parts of a pattern the scheduler reads every tick.
pub struct PatternState {
    timeline: Timeline,
    tracks: Vec<Track>,
}

impl PatternState {
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn track(&self, instrument: &str) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|track| track.instrument == instrument)
    }

    fn track_mut(&mut self, instrument: &str) -> Option<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|track| track.instrument == instrument)
    }

    fn apply_solo(&self) {
        let group: Vec<&PlaybackParameters> =
            self.tracks.iter().map(|track| &track.params).collect();
        apply_solo_group(&group);
    }
}

/// A drum pattern: a timeline plus one track per kit instrument, mixed into the
/// pattern's own submix bus.
pub struct Pattern {
    name: String,
    /// The pattern bus, a child of the master output.
    bus: BusId,
    params: PlaybackParameters,
    state: RwLock<PatternState>,
    ctx: AudioContext,
}

impl Pattern {
    /// Creates a pattern with a track for every instrument in the kit.
    pub fn new(ctx: &AudioContext, name: &str, kit: &Kit) -> Result<Pattern, Box<dyn Error>> {
        let bus = ctx.backend().create_submix(None)?;
        let pattern = Pattern {
            name: name.to_string(),
            bus,
            params: PlaybackParameters::new(),
            state: RwLock::new(PatternState {
                timeline: Timeline::default(),
                tracks: Vec::with_capacity(kit.len()),
            }),
            ctx: ctx.clone(),
        };
        if let Err(e) = pattern.load_kit(kit) {
            pattern.teardown();
            return Err(e);
        }
        info!(
            pattern = name,
            kit = kit.name(),
            tracks = kit.len(),
            "Created pattern"
        );
        Ok(pattern)
    }

    /// Switches to a different kit. Tracks whose instrument is in the new kit keep their
    /// bus, parameters and steps but get a new pool; tracks whose instrument is gone are
    /// torn down; new instruments get new tracks. Nothing changes unless every new pool
    /// and track could be created.
    ///
    /// Playback must be stopped while switching kits.
    pub fn load_kit(&self, kit: &Kit) -> Result<(), Box<dyn Error>> {
        let mut state = self.state.write();

        let mut pools = Vec::new();
        let mut added = Vec::new();
        if let Err(e) = self.prepare_kit(&state, kit, &mut pools, &mut added) {
            for (_, pool) in pools {
                self.ctx.registry().destroy(&pool);
            }
            for track in added {
                track.teardown(&self.ctx);
            }
            return Err(e);
        }

        for (index, pool) in pools {
            let old = std::mem::replace(&mut state.tracks[index].pool, pool);
            self.ctx.registry().destroy(&old);
        }
        let (kept, removed): (Vec<Track>, Vec<Track>) = state
            .tracks
            .drain(..)
            .partition(|track| kit.get(&track.instrument).is_some());
        for track in removed {
            debug!(
                pattern = %self.name,
                instrument = %track.instrument,
                "Removing track"
            );
            track.teardown(&self.ctx);
        }
        state.tracks = kept;
        state.tracks.extend(added);
        state.apply_solo();
        Ok(())
    }

    /// Creates the pools for kept tracks and the tracks for new instruments, without
    /// touching the current ones.
    fn prepare_kit(
        &self,
        state: &PatternState,
        kit: &Kit,
        pools: &mut Vec<(usize, Arc<VoicePool>)>,
        added: &mut Vec<Track>,
    ) -> Result<(), Box<dyn Error>> {
        for (index, track) in state.tracks.iter().enumerate() {
            if let Some(sample) = kit.get(&track.instrument) {
                let pool = self
                    .ctx
                    .create_pool(&track.instrument, sample.clone(), track.bus)?;
                pools.push((index, pool));
            }
        }
        for (instrument, sample) in kit.instruments() {
            if state.track(instrument).is_none() {
                added.push(Track::new(&self.ctx, self.bus, instrument, sample.clone())?);
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// The pattern-level parameters. Mute and solo across patterns are managed by the
    /// project.
    pub fn params(&self) -> &PlaybackParameters {
        &self.params
    }

    /// Sets the pattern volume and pushes it to the pattern bus.
    pub fn set_volume(&self, db: f32) -> bool {
        let changed = self.params.set_volume(db);
        if changed {
            self.ctx.backend().set_bus_volume(self.bus, self.params.amplitude());
        }
        changed
    }

    pub fn quarter_notes(&self) -> usize {
        self.state.read().timeline.quarter_notes()
    }

    /// Sets the pattern length. Returns the clamped length.
    pub fn set_quarter_notes(&self, quarter_notes: usize) -> usize {
        self.state.write().timeline.set_quarter_notes(quarter_notes)
    }

    pub fn rate(&self) -> TickRate {
        self.state.read().timeline.rate()
    }

    /// Sets the subdivision by ticks per quarter note. Returns the rate used.
    pub fn set_ticks(&self, ticks: usize) -> TickRate {
        self.state.write().timeline.set_ticks(ticks)
    }

    /// Selects or clears a step. The position must be one of the current rate's ticks.
    /// Returns false if the instrument or step doesn't exist.
    pub fn set_step(
        &self,
        instrument: &str,
        quarter: usize,
        position: usize,
        velocity: Option<f32>,
    ) -> bool {
        let mut state = self.state.write();
        if !state.timeline.rate().contains(position) {
            return false;
        }
        match state.track_mut(instrument) {
            Some(track) => track.steps.set(quarter, position, velocity),
            None => false,
        }
    }

    /// Returns the velocity of a selected step.
    pub fn step(&self, instrument: &str, quarter: usize, position: usize) -> Option<f32> {
        self.state
            .read()
            .track(instrument)
            .and_then(|track| track.steps.velocity(quarter, position))
    }

    /// Sets an instrument's volume and pushes it to the instrument bus.
    pub fn set_track_volume(&self, instrument: &str, db: f32) -> bool {
        let state = self.state.read();
        let Some(track) = state.track(instrument) else {
            return false;
        };
        let changed = track.params.set_volume(db);
        if changed {
            track.push_volume(&self.ctx);
        }
        changed
    }

    /// Sets an instrument's pan and pushes the channel gains to the instrument bus.
    pub fn set_track_pan(&self, instrument: &str, pan: f32) -> bool {
        let state = self.state.read();
        let Some(track) = state.track(instrument) else {
            return false;
        };
        let changed = track.params.set_pan(pan);
        if changed {
            track.push_pan(&self.ctx);
        }
        changed
    }

    /// Sets an instrument's pitch in semitones. Applies from the next note.
    pub fn set_track_pitch(&self, instrument: &str, semitones: f32) -> bool {
        self.state
            .read()
            .track(instrument)
            .map(|track| track.params.set_pitch(semitones))
            .unwrap_or(false)
    }

    pub fn set_track_muted(&self, instrument: &str, muted: bool) -> bool {
        self.state
            .read()
            .track(instrument)
            .map(|track| track.params.set_muted(muted))
            .unwrap_or(false)
    }

    /// Solos or unsolos an instrument and recomputes solo-mute across the pattern's tracks.
    pub fn set_track_solo(&self, instrument: &str, solo: bool) -> bool {
        let state = self.state.read();
        let Some(track) = state.track(instrument) else {
            return false;
        };
        let changed = track.params.set_solo(solo);
        if changed {
            state.apply_solo();
        }
        changed
    }

    /// Returns a snapshot of an instrument's parameters.
    pub fn track_params(&self, instrument: &str) -> Option<ParameterSnapshot> {
        self.state
            .read()
            .track(instrument)
            .map(|track| track.params.snapshot())
    }

    pub fn track_bus(&self, instrument: &str) -> Option<BusId> {
        self.state.read().track(instrument).map(|track| track.bus)
    }

    pub fn track_pool(&self, instrument: &str) -> Option<Arc<VoicePool>> {
        self.state
            .read()
            .track(instrument)
            .map(|track| track.pool.clone())
    }

    /// Returns the instrument names in track order.
    pub fn instruments(&self) -> Vec<String> {
        self.state
            .read()
            .tracks
            .iter()
            .map(|track| track.instrument.clone())
            .collect()
    }

    /// Locks the pattern for reading. Held by the scheduler for the length of one tick.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, PatternState> {
        self.state.read()
    }

    /// Releases every track and the pattern bus.
    pub fn teardown(&self) {
        let mut state = self.state.write();
        for track in state.tracks.drain(..) {
            track.teardown(&self.ctx);
        }
        self.ctx.backend().destroy_submix(self.bus);
        debug!(pattern = %self.name, "Tore down pattern");
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("timeline", &state.timeline)
            .field("tracks", &state.tracks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{self, Call};
    use crate::voices::PoolConfig;

    fn kit(names: &[&str]) -> Kit {
        let mut kit = Kit::new("test");
        for name in names {
            kit.insert(
                name,
                Arc::new(SampleBuffer::from_samples(vec![0.5; 8], 1, 44100)),
            );
        }
        kit
    }

    fn setup() -> (Arc<mock::Backend>, AudioContext) {
        let backend = mock::Backend::shared("mock");
        let ctx = AudioContext::new(backend.clone(), PoolConfig::default());
        (backend, ctx)
    }

    #[test]
    fn test_pattern_builds_bus_tree() {
        let (backend, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick", "snare"])).unwrap();

        assert_eq!(pattern.instruments(), vec!["kick", "snare"]);
        let kick_bus = pattern.track_bus("kick").unwrap();
        assert!(backend.calls().contains(&Call::CreateSubmix {
            bus: kick_bus,
            parent: Some(pattern.bus()),
        }));
        let pool = pattern.track_pool("kick").unwrap();
        assert_eq!(pool.bus(), kick_bus);
        assert_eq!(ctx.registry().len(), 2);
    }

    #[test]
    fn test_track_volume_and_pan_apply_immediately() {
        let (backend, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick"])).unwrap();
        let bus = pattern.track_bus("kick").unwrap();
        backend.clear_calls();

        assert!(pattern.set_track_volume("kick", -200.0));
        assert!(pattern.set_track_pan("kick", 0.0));
        assert!(!pattern.set_track_volume("cowbell", 0.0));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], Call::SetBusVolume { bus: b, .. } if b == bus));
        assert_eq!(
            calls[1],
            Call::SetChannelVolumes {
                bus,
                left: crate::params::PAN_GAIN,
                right: 0.0
            }
        );
        assert!(pattern.track_params("kick").unwrap().auto_muted);
    }

    #[test]
    fn test_track_solo_mutes_siblings() {
        let (_, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick", "snare", "hihat"])).unwrap();

        assert!(pattern.set_track_solo("snare", true));
        assert!(pattern.track_params("kick").unwrap().solo_muted);
        assert!(!pattern.track_params("snare").unwrap().solo_muted);
        assert!(pattern.track_params("hihat").unwrap().solo_muted);

        assert!(pattern.set_track_solo("snare", false));
        assert!(!pattern.track_params("kick").unwrap().solo_muted);
    }

    #[test]
    fn test_steps_follow_rate() {
        let (_, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick"])).unwrap();

        assert!(pattern.set_step("kick", 1, 6, Some(0.9)));
        assert!(!pattern.set_step("kick", 1, 8, Some(0.9)));
        assert!(!pattern.set_step("cowbell", 0, 0, Some(0.9)));

        assert_eq!(pattern.set_ticks(3), TickRate::EighthTriplet);
        assert!(pattern.set_step("kick", 1, 8, Some(0.5)));
        assert_eq!(pattern.step("kick", 1, 6), Some(0.9));
        assert_eq!(pattern.step("kick", 1, 8), Some(0.5));

        assert_eq!(pattern.set_quarter_notes(64), 32);
    }

    #[test]
    fn test_load_kit_keeps_matching_tracks() {
        let (backend, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick", "snare"])).unwrap();
        pattern.set_step("kick", 0, 0, Some(1.0));
        pattern.set_track_pitch("kick", 3.0);
        let kick_bus = pattern.track_bus("kick").unwrap();
        let snare_bus = pattern.track_bus("snare").unwrap();
        let old_pool = pattern.track_pool("kick").unwrap();

        pattern.load_kit(&kit(&["kick", "hihat"])).unwrap();

        assert_eq!(pattern.instruments(), vec!["kick", "hihat"]);
        // The kick keeps its bus, steps and parameters with a new pool.
        assert_eq!(pattern.track_bus("kick"), Some(kick_bus));
        assert_eq!(pattern.step("kick", 0, 0), Some(1.0));
        assert_eq!(pattern.track_params("kick").unwrap().pitch, 3.0);
        assert!(old_pool.is_destroyed());
        assert!(backend.has_bus(kick_bus));
        // The snare is gone entirely.
        assert!(!backend.has_bus(snare_bus));
        assert_eq!(ctx.registry().len(), 2);
    }

    #[test]
    fn test_failed_kit_load_leaves_pattern_unchanged() {
        use crate::audio::Backend as _;

        let (backend, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick", "snare"])).unwrap();
        pattern.set_step("snare", 1, 6, Some(0.5));
        let kick_pool = pattern.track_pool("kick").unwrap();
        let snare_pool = pattern.track_pool("snare").unwrap();

        // The snare bus disappearing makes its new pool fail after the kick's succeeded.
        backend.destroy_submix(pattern.track_bus("snare").unwrap());
        assert!(pattern.load_kit(&kit(&["kick", "snare", "tom"])).is_err());

        assert_eq!(pattern.instruments(), vec!["kick", "snare"]);
        assert!(Arc::ptr_eq(&pattern.track_pool("kick").unwrap(), &kick_pool));
        assert!(Arc::ptr_eq(&pattern.track_pool("snare").unwrap(), &snare_pool));
        assert!(!kick_pool.is_destroyed());
        assert_eq!(pattern.step("snare", 1, 6), Some(0.5));
        assert_eq!(ctx.registry().len(), 2);
        assert_eq!(backend.voice_count(), kick_pool.size() + snare_pool.size());

        pattern.teardown();
        assert!(ctx.registry().is_empty());
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.bus_count(), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let (backend, ctx) = setup();
        let pattern = Pattern::new(&ctx, "verse", &kit(&["kick", "snare"])).unwrap();

        pattern.teardown();
        assert!(ctx.registry().is_empty());
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.bus_count(), 0);
    }
}
