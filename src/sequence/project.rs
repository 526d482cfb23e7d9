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
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::info;

use super::{Pattern, Song};
use crate::audio::AudioContext;
use crate::params::{apply_solo_group, PlaybackParameters};
use crate::samples::Kit;

/// Everything the scheduler plays: the patterns, the song arrangement and the master
/// output level.
pub struct Project {
    ctx: AudioContext,
    patterns: RwLock<Vec<Arc<Pattern>>>,
    /// The pattern played in pattern mode.
    active_pattern: AtomicUsize,
    song: RwLock<Song>,
    master: PlaybackParameters,
}

impl Project {
    pub fn new(ctx: &AudioContext) -> Project {
        Project {
            ctx: ctx.clone(),
            patterns: RwLock::new(Vec::new()),
            active_pattern: AtomicUsize::new(0),
            song: RwLock::new(Song::new()),
            master: PlaybackParameters::new(),
        }
    }

    /// Creates a pattern for the kit and adds it. Returns the new pattern's index.
    pub fn create_pattern(&self, name: &str, kit: &Kit) -> Result<usize, Box<dyn Error>> {
        let pattern = Pattern::new(&self.ctx, name, kit)?;
        Ok(self.add_pattern(pattern))
    }

    /// Adds a pattern and recomputes solo-mute across the patterns. Returns its index.
    pub fn add_pattern(&self, pattern: Pattern) -> usize {
        let mut patterns = self.patterns.write();
        patterns.push(Arc::new(pattern));
        let group: Vec<&PlaybackParameters> =
            patterns.iter().map(|pattern| pattern.params()).collect();
        apply_solo_group(&group);
        patterns.len() - 1
    }

    pub fn pattern(&self, index: usize) -> Option<Arc<Pattern>> {
        self.patterns.read().get(index).cloned()
    }

    /// Finds a pattern and its index by name.
    pub fn pattern_by_name(&self, name: &str) -> Option<(usize, Arc<Pattern>)> {
        self.patterns
            .read()
            .iter()
            .enumerate()
            .find(|(_, pattern)| pattern.name() == name)
            .map(|(index, pattern)| (index, pattern.clone()))
    }

    /// Returns every pattern, in index order.
    pub fn patterns(&self) -> Vec<Arc<Pattern>> {
        self.patterns.read().clone()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.read().len()
    }

    /// Chooses the pattern played in pattern mode. Takes effect at the start of the next
    /// pass. Returns false if there's no such pattern.
    pub fn set_active_pattern(&self, index: usize) -> bool {
        if index >= self.pattern_count() {
            return false;
        }
        self.active_pattern.store(index, Ordering::Release);
        true
    }

    pub fn active_pattern(&self) -> usize {
        self.active_pattern.load(Ordering::Acquire)
    }

    /// Selects a pattern at a song position. Returns false for an unknown pattern, for
    /// position 0, or if it was already selected.
    pub fn select_song_position(&self, position: usize, pattern: usize) -> bool {
        if pattern >= self.pattern_count() {
            return false;
        }
        self.song.write().select(position, pattern)
    }

    /// Deselects a pattern at a song position. Returns true if it was selected.
    pub fn deselect_song_position(&self, position: usize, pattern: usize) -> bool {
        self.song.write().deselect(position, pattern)
    }

    /// Returns the patterns selected at a song position.
    pub fn song_patterns(&self, position: usize) -> Vec<Arc<Pattern>> {
        let indexes = self.song.read().patterns_at(position);
        let patterns = self.patterns.read();
        indexes
            .into_iter()
            .filter_map(|index| patterns.get(index).cloned())
            .collect()
    }

    /// Returns the highest selected song position, or 0 if the song is empty.
    pub fn max_song_position(&self) -> usize {
        self.song.read().max_position()
    }

    pub fn clear_song(&self) {
        self.song.write().clear();
    }

    /// The master output parameters.
    pub fn master(&self) -> &PlaybackParameters {
        &self.master
    }

    /// Sets the master volume and pushes it to the backend.
    pub fn set_master_volume(&self, db: f32) -> bool {
        let changed = self.master.set_volume(db);
        if changed {
            self.ctx.backend().set_master_volume(self.master.amplitude());
        }
        changed
    }

    /// Mutes or unmutes a pattern in song mode.
    pub fn set_pattern_muted(&self, index: usize, muted: bool) -> bool {
        self.pattern(index)
            .map(|pattern| pattern.params().set_muted(muted))
            .unwrap_or(false)
    }

    /// Solos or unsolos a pattern in song mode, and recomputes solo-mute across patterns.
    pub fn set_pattern_solo(&self, index: usize, solo: bool) -> bool {
        let patterns = self.patterns.read();
        let Some(pattern) = patterns.get(index) else {
            return false;
        };
        let changed = pattern.params().set_solo(solo);
        if changed {
            let group: Vec<&PlaybackParameters> =
                patterns.iter().map(|pattern| pattern.params()).collect();
            apply_solo_group(&group);
        }
        changed
    }

    /// Loads a kit into every pattern. Playback must be stopped.
    pub fn load_kit(&self, kit: &Kit) -> Result<(), Box<dyn Error>> {
        info!(kit = kit.name(), "Loading kit into project");
        for pattern in self.patterns() {
            pattern.load_kit(kit)?;
        }
        Ok(())
    }

    /// Tears down every pattern. Playback must be stopped.
    pub fn teardown(&self) {
        let patterns = std::mem::take(&mut *self.patterns.write());
        for pattern in patterns {
            pattern.teardown();
        }
        self.song.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{self, Call};
    use crate::samples::SampleBuffer;
    use crate::voices::PoolConfig;

    fn setup() -> (Arc<mock::Backend>, Project, Kit) {
        let backend = mock::Backend::shared("mock");
        let ctx = AudioContext::new(backend.clone(), PoolConfig::default());
        let mut kit = Kit::new("test");
        kit.insert(
            "kick",
            Arc::new(SampleBuffer::from_samples(vec![0.5; 8], 1, 44100)),
        );
        (backend, Project::new(&ctx), kit)
    }

    #[test]
    fn test_patterns_and_song() {
        let (_, project, kit) = setup();
        assert_eq!(project.create_pattern("intro", &kit).unwrap(), 0);
        assert_eq!(project.create_pattern("verse", &kit).unwrap(), 1);

        assert_eq!(project.pattern_by_name("verse").unwrap().0, 1);
        assert!(project.pattern_by_name("chorus").is_none());
        assert!(project.set_active_pattern(1));
        assert!(!project.set_active_pattern(2));
        assert_eq!(project.active_pattern(), 1);

        assert!(project.select_song_position(1, 0));
        assert!(project.select_song_position(1, 1));
        assert!(project.select_song_position(3, 1));
        assert!(!project.select_song_position(2, 9));
        assert_eq!(project.max_song_position(), 3);

        let names: Vec<String> = project
            .song_patterns(1)
            .iter()
            .map(|pattern| pattern.name().to_string())
            .collect();
        assert_eq!(names, vec!["intro", "verse"]);
        assert!(project.song_patterns(2).is_empty());

        assert!(project.deselect_song_position(3, 1));
        assert_eq!(project.max_song_position(), 1);
    }

    #[test]
    fn test_pattern_solo_group() {
        let (_, project, kit) = setup();
        project.create_pattern("intro", &kit).unwrap();
        project.create_pattern("verse", &kit).unwrap();

        assert!(project.set_pattern_solo(1, true));
        assert!(project.pattern(0).unwrap().params().is_solo_muted());
        assert!(!project.pattern(1).unwrap().params().is_solo_muted());

        assert!(project.set_pattern_muted(1, true));
        assert!(!project.pattern(1).unwrap().params().is_audible());
        assert!(!project.set_pattern_solo(5, true));
    }

    #[test]
    fn test_new_pattern_joins_solo_group() {
        let (_, project, kit) = setup();
        project.create_pattern("intro", &kit).unwrap();
        assert!(project.set_pattern_solo(0, true));

        let verse = project.create_pattern("verse", &kit).unwrap();
        assert!(!project.set_pattern_solo(verse, false));
        let pattern = project.pattern(verse).unwrap();
        assert!(pattern.params().is_solo_muted());
        assert!(!pattern.params().is_audible());
        assert!(!project.pattern(0).unwrap().params().is_solo_muted());

        assert!(project.set_pattern_solo(0, false));
        assert!(project.pattern(verse).unwrap().params().is_audible());
    }

    #[test]
    fn test_master_volume() {
        let (backend, project, _) = setup();
        assert!(project.set_master_volume(-6.0));
        assert!(!project.set_master_volume(-6.0));
        let amplitude = project.master().amplitude();
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|call| **call == Call::SetMasterVolume(amplitude))
                .count(),
            1
        );
    }

    #[test]
    fn test_teardown() {
        let (backend, project, kit) = setup();
        project.create_pattern("intro", &kit).unwrap();
        project.select_song_position(1, 0);

        project.teardown();
        assert_eq!(project.pattern_count(), 0);
        assert_eq!(project.max_song_position(), 0);
        assert_eq!(backend.bus_count(), 0);
        assert_eq!(backend.voice_count(), 0);
    }
}
