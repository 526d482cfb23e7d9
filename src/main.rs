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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing_subscriber::EnvFilter;

use tambala::audio;
use tambala::config;
use tambala::engine::Engine;
use tambala::scheduler::{PlayMode, PlaybackEvent};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A drum pattern sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Loads and validates a project, including its samples.
    Verify {
        /// The path to the project file.
        project_path: String,
    },
    /// Plays a project through an audio device.
    Play {
        /// The path to the project file.
        project_path: String,
        /// The device name to play through. "mock" plays silently.
        #[arg[short, long]]
        device: Option<String>,
        /// Plays the song arrangement instead of the first pattern.
        #[arg[short, long]]
        song: bool,
        /// How long to play for.
        #[arg[short = 't', long, default_value = "10s"]]
        duration: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { project_path } => {
            let path = PathBuf::from(&project_path);
            let project = config::load_project(&path)?;

            println!("Project {}:", project_path);
            println!("- tempo: {}", project.tempo());
            println!("- instruments: {}", project.kit(Path::new("")).len());
            for pattern in project.patterns() {
                let steps: usize = pattern.tracks().map(|(_, steps)| steps.len()).sum();
                println!(
                    "- pattern {} ({} quarter notes, {} steps)",
                    pattern.name(),
                    pattern.quarter_notes(),
                    steps
                );
            }
            for position in project.song() {
                println!(
                    "- song position {}: {}",
                    position.position(),
                    position.patterns().join(", ")
                );
            }

            // Build against the mock backend to make sure every sample decodes.
            let engine = Engine::load(&path, Some("mock"))?;
            engine.shutdown();
            println!("OK");
        }
        Commands::Play {
            project_path,
            device,
            song,
            duration,
        } => {
            let duration: Duration = DurationString::from_string(duration)?.into();
            let engine = Engine::load(&PathBuf::from(&project_path), device.as_deref())?;
            let mode = if song {
                PlayMode::Song
            } else {
                PlayMode::Pattern
            };

            engine.play(mode);
            let deadline = Instant::now() + duration;
            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                match engine.events().recv_timeout(remaining) {
                    Ok(PlaybackEvent::Counter(counter)) => println!("{}", counter),
                    Ok(PlaybackEvent::SongPosition(position)) => {
                        println!("Song position {}", position)
                    }
                    Ok(PlaybackEvent::Stopped(mode)) => {
                        println!("Stopped {} playback", mode);
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            engine.stop();
            engine.shutdown();
        }
    }

    Ok(())
}
