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
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_channel::Receiver;
use tracing::{info, warn};

use crate::audio::{self, AudioContext, Backend};
use crate::config::{self, ProjectConfig};
use crate::metronome::Metronome;
use crate::samples::{Kit, SampleBuffer, SampleLoader};
use crate::scheduler::{PlayMode, PlaybackEvent, Scheduler};
use crate::sequence::Project;

/// A loaded project wired to a backend and ready to play.
pub struct Engine {
    ctx: AudioContext,
    project: Arc<Project>,
    metronome: Option<Arc<Metronome>>,
    scheduler: Scheduler,
    events: Receiver<PlaybackEvent>,
}

impl Engine {
    /// Loads a project file and opens the named output device, or the default one.
    pub fn load(path: &Path, device: Option<&str>) -> Result<Engine, Box<dyn Error>> {
        let config = config::load_project(path)?;
        let base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let backend = audio::get_backend(device)?;
        Engine::from_config(&config, &base_path, backend)
    }

    /// Builds the project described by the config on the given backend. Sample paths are
    /// resolved against the base path. Anything created before a failure is released.
    pub fn from_config(
        config: &ProjectConfig,
        base_path: &Path,
        backend: Arc<dyn Backend>,
    ) -> Result<Engine, Box<dyn Error>> {
        // Decode everything before touching the backend.
        let mut loader = SampleLoader::new();
        let mut kit = Kit::new("project");
        for (instrument, path) in config.kit(base_path) {
            kit.insert(&instrument, loader.load(&path)?);
        }
        let click = match config.metronome() {
            Some(metronome) => Some(loader.load(&metronome.sample(base_path))?),
            None => None,
        };
        info!(
            instruments = kit.len(),
            memory = loader.total_memory_usage(),
            "Decoded kit"
        );

        let ctx = AudioContext::new(backend.clone(), config.voices().pool_config());
        let project = Arc::new(Project::new(&ctx));
        let metronome = match build(&ctx, &project, config, &kit, click) {
            Ok(metronome) => metronome,
            Err(e) => {
                project.teardown();
                ctx.shutdown();
                return Err(e);
            }
        };

        let (scheduler, events) =
            match Scheduler::new(project.clone(), metronome.clone(), backend, config.tempo()) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    project.teardown();
                    if let Some(metronome) = &metronome {
                        metronome.teardown();
                    }
                    ctx.shutdown();
                    return Err(e.into());
                }
            };

        info!(
            backend = %ctx.backend(),
            patterns = project.pattern_count(),
            tempo = scheduler.tempo(),
            "Engine ready"
        );
        Ok(Engine {
            ctx,
            project,
            metronome,
            scheduler,
            events,
        })
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn metronome(&self) -> Option<&Arc<Metronome>> {
        self.metronome.as_ref()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    /// Playback notifications, to be drained by the host.
    pub fn events(&self) -> &Receiver<PlaybackEvent> {
        &self.events
    }

    pub fn play(&self, mode: PlayMode) -> bool {
        self.scheduler.start(mode)
    }

    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    /// Stops the workers, then releases every pool and bus.
    pub fn shutdown(self) {
        self.scheduler.shutdown();
        self.project.teardown();
        if let Some(metronome) = &self.metronome {
            metronome.teardown();
        }
        self.ctx.shutdown();
        info!("Engine shut down");
    }
}

/// Populates the project and creates the metronome.
fn build(
    ctx: &AudioContext,
    project: &Project,
    config: &ProjectConfig,
    kit: &Kit,
    click: Option<Arc<SampleBuffer>>,
) -> Result<Option<Arc<Metronome>>, Box<dyn Error>> {
    for pattern_config in config.patterns() {
        let index = project.create_pattern(pattern_config.name(), kit)?;
        let Some(pattern) = project.pattern(index) else {
            continue;
        };
        pattern.set_quarter_notes(pattern_config.quarter_notes());
        pattern.set_ticks(pattern_config.ticks());
        if let Some(volume) = pattern_config.volume() {
            pattern.set_volume(volume);
        }

        for (instrument, _) in kit.instruments() {
            let Some(defaults) = config.instrument(instrument) else {
                continue;
            };
            if let Some(volume) = defaults.volume() {
                pattern.set_track_volume(instrument, volume);
            }
            if let Some(pan) = defaults.pan() {
                pattern.set_track_pan(instrument, pan);
            }
            if let Some(pitch) = defaults.pitch() {
                pattern.set_track_pitch(instrument, pitch);
            }
            pattern.set_track_muted(instrument, defaults.muted());
            pattern.set_track_solo(instrument, defaults.solo());
        }

        for (instrument, steps) in pattern_config.tracks() {
            for step in steps {
                if !pattern.set_step(
                    instrument,
                    step.quarter(),
                    step.position(),
                    Some(step.velocity()),
                ) {
                    warn!(
                        pattern = pattern_config.name(),
                        instrument,
                        quarter = step.quarter(),
                        position = step.position(),
                        "Ignoring unplayable step"
                    );
                }
            }
        }

        project.set_pattern_muted(index, pattern_config.muted());
        project.set_pattern_solo(index, pattern_config.solo());
    }

    for position in config.song() {
        for name in position.patterns() {
            match project.pattern_by_name(name) {
                Some((index, _)) => {
                    project.select_song_position(position.position(), index);
                }
                None => warn!(pattern = %name, "Song refers to a missing pattern"),
            }
        }
    }
    project.set_master_volume(config.master_volume());

    let metronome = match (config.metronome(), click) {
        (Some(metronome_config), Some(click)) => {
            let metronome = Metronome::new(ctx, click)?;
            metronome.set_active(metronome_config.active());
            metronome.set_frequency(metronome_config.frequency());
            if let Some(volume) = metronome_config.volume() {
                metronome.set_volume(volume);
            }
            Some(Arc::new(metronome))
        }
        _ => None,
    };
    Ok(metronome)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::audio::mock::{self, Call};
    use crate::testutil::{eventually, write_wav};

    const PROJECT: &str = r#"
tempo: 240
kit:
  kick: kick.wav
  snare: snare.wav
instruments:
  snare:
    volume: -6.0
patterns:
  - name: verse
    quarter_notes: 2
    tracks:
      kick:
        - quarter: 0
          position: 0
      snare:
        - quarter: 1
          position: 12
          velocity: 0.8
  - name: fill
    quarter_notes: 1
song:
  - position: 1
    patterns: [verse, fill]
metronome:
  sample: click.wav
  active: true
voices:
  min: 2
  max: 4
"#;

    fn write_project(dir: &Path) -> PathBuf {
        for name in ["kick.wav", "snare.wav", "click.wav"] {
            write_wav(&dir.join(name), 64);
        }
        let path = dir.join("project.yaml");
        fs::write(&path, PROJECT).unwrap();
        path
    }

    #[test]
    fn test_builds_project_from_config() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_project(dir.path());
        let config = config::load_project(&path)?;
        let backend = mock::Backend::shared("mock");
        let engine = Engine::from_config(&config, dir.path(), backend.clone())?;

        let project = engine.project();
        assert_eq!(project.pattern_count(), 2);
        let (_, verse) = project.pattern_by_name("verse").unwrap();
        assert_eq!(verse.quarter_notes(), 2);
        assert_eq!(verse.step("kick", 0, 0), Some(1.0));
        assert_eq!(verse.step("snare", 1, 12), Some(0.8));
        assert_eq!(verse.track_params("snare").unwrap().volume_db, -6.0);
        assert_eq!(verse.track_pool("kick").unwrap().size(), 4);
        assert_eq!(project.song_patterns(1).len(), 2);

        let metronome = engine.metronome().unwrap();
        assert!(metronome.is_active());
        assert_eq!(engine.scheduler().tempo(), 240);

        engine.shutdown();
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.bus_count(), 0);
        Ok(())
    }

    #[test]
    fn test_plays_and_shuts_down_cleanly() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_project(dir.path());
        let config = config::load_project(&path)?;
        let backend = mock::Backend::shared("mock");
        backend.set_auto_release(true);
        let engine = Engine::from_config(&config, dir.path(), backend.clone())?;

        assert!(engine.play(PlayMode::Song));
        eventually(
            || {
                backend
                    .calls()
                    .iter()
                    .any(|call| matches!(call, Call::Commit(_)))
            },
            "Song never played",
        );
        eventually(
            || {
                engine
                    .events()
                    .try_iter()
                    .any(|event| event == PlaybackEvent::SongPosition(1))
            },
            "Song position never posted",
        );

        engine.shutdown();
        assert_eq!(backend.voice_count(), 0);
        assert_eq!(backend.bus_count(), 0);
        Ok(())
    }

    #[test]
    fn test_soloed_pattern_silences_later_patterns() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        write_wav(&dir.path().join("kick.wav"), 64);
        let config = ProjectConfig::from_yaml(
            r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
    solo: true
  - name: chorus
  - name: bridge
"#,
        )?;
        let backend = mock::Backend::shared("mock");
        let engine = Engine::from_config(&config, dir.path(), backend)?;

        let project = engine.project();
        let (_, verse) = project.pattern_by_name("verse").unwrap();
        assert!(verse.params().is_audible());
        for name in ["chorus", "bridge"] {
            let (_, pattern) = project.pattern_by_name(name).unwrap();
            assert!(pattern.params().is_solo_muted());
            assert!(!pattern.params().is_audible());
        }

        engine.shutdown();
        Ok(())
    }

    #[test]
    fn test_missing_sample_fails_before_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.yaml");
        fs::write(&path, "kit:\n  kick: missing.wav\n").unwrap();
        let config = config::load_project(&path).unwrap();
        let backend = mock::Backend::shared("mock");

        assert!(Engine::from_config(&config, dir.path(), backend.clone()).is_err());
        assert!(backend.calls().is_empty());
    }
}
