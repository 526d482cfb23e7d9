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
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use super::error::ConfigError;
use crate::scheduler::DEFAULT_TEMPO;
use crate::sequence::{Timeline, DEFAULT_QUARTER_NOTES, MAX_QUARTER_NOTES};
use crate::voices::{PoolConfig, DEFAULT_GROW_BY, DEFAULT_MAX_VOICES, DEFAULT_MIN_VOICES};

fn default_tempo() -> u32 {
    DEFAULT_TEMPO
}

fn default_quarter_notes() -> usize {
    DEFAULT_QUARTER_NOTES
}

fn default_ticks() -> usize {
    4
}

fn default_velocity() -> f32 {
    1.0
}

fn default_frequency() -> usize {
    1
}

/// A YAML representation of a project.
#[derive(Deserialize, Debug, Clone)]
pub struct ProjectConfig {
    /// Beats per minute.
    #[serde(default = "default_tempo")]
    tempo: u32,
    /// Instrument name to sample file, relative to the project file.
    kit: BTreeMap<String, String>,
    /// Per-instrument defaults applied to every pattern's track.
    #[serde(default)]
    instruments: BTreeMap<String, InstrumentConfig>,
    #[serde(default)]
    patterns: Vec<PatternConfig>,
    #[serde(default)]
    song: Vec<SongPositionConfig>,
    metronome: Option<MetronomeConfig>,
    #[serde(default)]
    voices: VoicesConfig,
    /// Master volume in dB.
    #[serde(default)]
    master_volume: f32,
}

impl ProjectConfig {
    /// Deserializes and validates a project file.
    pub fn deserialize(path: &Path) -> Result<ProjectConfig, ConfigError> {
        let project = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<ProjectConfig>()?;
        project.validate()?;
        info!(
            path = ?path,
            patterns = project.patterns.len(),
            instruments = project.kit.len(),
            "Loaded project"
        );
        Ok(project)
    }

    /// Parses and validates a project from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<ProjectConfig, ConfigError> {
        let project = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<ProjectConfig>()?;
        project.validate()?;
        Ok(project)
    }

    /// Checks that every reference resolves and every step is playable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for instrument in self.instruments.keys() {
            if !self.kit.contains_key(instrument) {
                return Err(ConfigError::UnknownInstrument {
                    context: "instrument defaults".to_string(),
                    instrument: instrument.clone(),
                });
            }
        }

        let mut names = HashSet::new();
        for pattern in &self.patterns {
            if !names.insert(pattern.name.as_str()) {
                return Err(ConfigError::DuplicatePattern(pattern.name.clone()));
            }
            let timeline = pattern.timeline();
            for (instrument, steps) in &pattern.tracks {
                if !self.kit.contains_key(instrument) {
                    return Err(ConfigError::UnknownInstrument {
                        context: format!("pattern {}", pattern.name),
                        instrument: instrument.clone(),
                    });
                }
                for step in steps {
                    if step.quarter >= MAX_QUARTER_NOTES || !timeline.rate().contains(step.position)
                    {
                        return Err(ConfigError::InvalidStep {
                            pattern: pattern.name.clone(),
                            instrument: instrument.clone(),
                            quarter: step.quarter,
                            position: step.position,
                        });
                    }
                }
            }
        }

        for position in &self.song {
            if position.position == 0 {
                return Err(ConfigError::InvalidSongPosition);
            }
            for pattern in &position.patterns {
                if !names.contains(pattern.as_str()) {
                    return Err(ConfigError::UnknownPattern {
                        position: position.position,
                        pattern: pattern.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    /// Returns the kit's instruments with their sample paths resolved against the
    /// project directory.
    pub fn kit(&self, base_path: &Path) -> Vec<(String, PathBuf)> {
        self.kit
            .iter()
            .map(|(instrument, sample)| (instrument.clone(), base_path.join(sample)))
            .collect()
    }

    pub fn instrument(&self, name: &str) -> Option<&InstrumentConfig> {
        self.instruments.get(name)
    }

    pub fn patterns(&self) -> &[PatternConfig] {
        &self.patterns
    }

    pub fn song(&self) -> &[SongPositionConfig] {
        &self.song
    }

    pub fn metronome(&self) -> Option<&MetronomeConfig> {
        self.metronome.as_ref()
    }

    pub fn voices(&self) -> &VoicesConfig {
        &self.voices
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }
}

/// Per-instrument playback defaults.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct InstrumentConfig {
    volume: Option<f32>,
    pitch: Option<f32>,
    pan: Option<f32>,
    #[serde(default)]
    muted: bool,
    #[serde(default)]
    solo: bool,
}

impl InstrumentConfig {
    pub fn volume(&self) -> Option<f32> {
        self.volume
    }

    pub fn pitch(&self) -> Option<f32> {
        self.pitch
    }

    pub fn pan(&self) -> Option<f32> {
        self.pan
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn solo(&self) -> bool {
        self.solo
    }
}

/// A pattern and its selected steps.
#[derive(Deserialize, Debug, Clone)]
pub struct PatternConfig {
    name: String,
    #[serde(default = "default_quarter_notes")]
    quarter_notes: usize,
    /// Ticks per quarter note of the step rate.
    #[serde(default = "default_ticks")]
    ticks: usize,
    /// Pattern volume in dB.
    volume: Option<f32>,
    #[serde(default)]
    muted: bool,
    #[serde(default)]
    solo: bool,
    /// Instrument name to selected steps.
    #[serde(default)]
    tracks: BTreeMap<String, Vec<StepConfig>>,
}

impl PatternConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pattern's timeline, with the same clamping the pattern applies.
    pub fn timeline(&self) -> Timeline {
        Timeline::new(self.quarter_notes, self.ticks)
    }

    pub fn quarter_notes(&self) -> usize {
        self.quarter_notes
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn volume(&self) -> Option<f32> {
        self.volume
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn solo(&self) -> bool {
        self.solo
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&str, &[StepConfig])> {
        self.tracks
            .iter()
            .map(|(instrument, steps)| (instrument.as_str(), steps.as_slice()))
    }
}

/// One selected step. Quarters count from 0; positions are subticks within the quarter.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StepConfig {
    quarter: usize,
    position: usize,
    #[serde(default = "default_velocity")]
    velocity: f32,
}

impl StepConfig {
    pub fn quarter(&self) -> usize {
        self.quarter
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }
}

/// The patterns played together at a song position.
#[derive(Deserialize, Debug, Clone)]
pub struct SongPositionConfig {
    position: usize,
    patterns: Vec<String>,
}

impl SongPositionConfig {
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// The click track.
#[derive(Deserialize, Debug, Clone)]
pub struct MetronomeConfig {
    /// Sample file, relative to the project file.
    sample: String,
    #[serde(default)]
    active: bool,
    /// Ticks per quarter note of the click subdivision.
    #[serde(default = "default_frequency")]
    frequency: usize,
    /// Metronome volume in dB.
    volume: Option<f32>,
}

impl MetronomeConfig {
    pub fn sample(&self, base_path: &Path) -> PathBuf {
        base_path.join(&self.sample)
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn frequency(&self) -> usize {
        self.frequency
    }

    pub fn volume(&self) -> Option<f32> {
        self.volume
    }
}

/// Voice pool sizing.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct VoicesConfig {
    #[serde(default = "default_min_voices")]
    min: usize,
    #[serde(default = "default_max_voices")]
    max: usize,
    #[serde(default = "default_min_voices")]
    initial: usize,
    #[serde(default = "default_grow_by")]
    grow_by: usize,
}

fn default_min_voices() -> usize {
    DEFAULT_MIN_VOICES
}

fn default_max_voices() -> usize {
    DEFAULT_MAX_VOICES
}

fn default_grow_by() -> usize {
    DEFAULT_GROW_BY
}

impl Default for VoicesConfig {
    fn default() -> Self {
        VoicesConfig {
            min: DEFAULT_MIN_VOICES,
            max: DEFAULT_MAX_VOICES,
            initial: DEFAULT_MIN_VOICES,
            grow_by: DEFAULT_GROW_BY,
        }
    }
}

impl VoicesConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.min, self.max, self.initial, self.grow_by)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    const PROJECT: &str = r#"
tempo: 96
kit:
  kick: samples/kick.wav
  snare: samples/snare.wav
instruments:
  snare:
    volume: -6.0
    pan: 0.25
patterns:
  - name: verse
    quarter_notes: 2
    tracks:
      kick:
        - quarter: 0
          position: 0
        - quarter: 1
          position: 12
          velocity: 0.5
  - name: fill
    ticks: 3
    volume: -3.0
song:
  - position: 1
    patterns: [verse]
  - position: 2
    patterns: [verse, fill]
metronome:
  sample: samples/click.wav
  active: true
  frequency: 2
voices:
  min: 4
  max: 8
master_volume: -1.5
"#;

    #[test]
    fn test_parse_project() -> Result<(), Box<dyn Error>> {
        let project = ProjectConfig::from_yaml(PROJECT)?;
        assert_eq!(project.tempo(), 96);
        assert_eq!(project.master_volume(), -1.5);

        let kit = project.kit(Path::new("/projects/demo"));
        assert_eq!(
            kit,
            vec![
                (
                    "kick".to_string(),
                    PathBuf::from("/projects/demo/samples/kick.wav")
                ),
                (
                    "snare".to_string(),
                    PathBuf::from("/projects/demo/samples/snare.wav")
                ),
            ]
        );

        let snare = project.instrument("snare").unwrap();
        assert_eq!(snare.volume(), Some(-6.0));
        assert_eq!(snare.pan(), Some(0.25));
        assert_eq!(snare.pitch(), None);
        assert!(project.instrument("kick").is_none());

        let patterns = project.patterns();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].name(), "verse");
        assert_eq!(patterns[0].quarter_notes(), 2);
        assert_eq!(patterns[0].ticks(), 4);
        let tracks: Vec<(&str, &[StepConfig])> = patterns[0].tracks().collect();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].0, "kick");
        assert_eq!(tracks[0].1[0].velocity(), 1.0);
        assert_eq!(tracks[0].1[1].velocity(), 0.5);
        assert_eq!(patterns[1].quarter_notes(), DEFAULT_QUARTER_NOTES);
        assert_eq!(patterns[1].ticks(), 3);
        assert_eq!(patterns[1].volume(), Some(-3.0));

        assert_eq!(project.song().len(), 2);
        assert_eq!(project.song()[1].patterns(), ["verse", "fill"]);

        let metronome = project.metronome().unwrap();
        assert!(metronome.active());
        assert_eq!(metronome.frequency(), 2);

        let pool = project.voices().pool_config();
        assert_eq!(pool.min_size(), 4);
        assert_eq!(pool.max_size(), 8);
        assert_eq!(pool.initial_size(), 16.clamp(4, 8));
        assert_eq!(pool.grow_by(), DEFAULT_GROW_BY);
        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<(), Box<dyn Error>> {
        let project = ProjectConfig::from_yaml("kit:\n  kick: kick.wav\n")?;
        assert_eq!(project.tempo(), DEFAULT_TEMPO);
        assert!(project.patterns().is_empty());
        assert!(project.metronome().is_none());
        assert_eq!(project.voices().pool_config().min_size(), DEFAULT_MIN_VOICES);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_references() {
        let unknown_instrument = r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
    tracks:
      cowbell:
        - quarter: 0
          position: 0
"#;
        assert!(matches!(
            ProjectConfig::from_yaml(unknown_instrument),
            Err(ConfigError::UnknownInstrument { .. })
        ));

        let unknown_pattern = r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
song:
  - position: 1
    patterns: [chorus]
"#;
        assert!(matches!(
            ProjectConfig::from_yaml(unknown_pattern),
            Err(ConfigError::UnknownPattern { position: 1, .. })
        ));

        let duplicate = r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
  - name: verse
"#;
        assert!(matches!(
            ProjectConfig::from_yaml(duplicate),
            Err(ConfigError::DuplicatePattern(_))
        ));

        let position_zero = r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
song:
  - position: 0
    patterns: [verse]
"#;
        assert!(matches!(
            ProjectConfig::from_yaml(position_zero),
            Err(ConfigError::InvalidSongPosition)
        ));
    }

    #[test]
    fn test_rejects_steps_off_the_rate() {
        // Position 3 is a thirty-second, not a sixteenth.
        let yaml = r#"
kit:
  kick: kick.wav
patterns:
  - name: verse
    ticks: 4
    tracks:
      kick:
        - quarter: 0
          position: 3
"#;
        assert!(matches!(
            ProjectConfig::from_yaml(yaml),
            Err(ConfigError::InvalidStep { position: 3, .. })
        ));
    }

    #[test]
    fn test_deserialize_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ProjectConfig::deserialize(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
