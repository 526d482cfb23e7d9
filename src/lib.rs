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

//! A drum pattern sequencer engine.
//!
//! Patterns of selected steps are walked by a tick [`scheduler`] at a fixed 24-subtick
//! grid per quarter note. Every step triggers a voice from a per-instrument
//! [`voices::VoicePool`], and all voices due on the same tick start together through an
//! operation set committed to the [`audio::Backend`].

pub mod audio;
pub mod config;
pub mod engine;
pub mod metronome;
pub mod params;
pub mod playsync;
pub mod samples;
pub mod scheduler;
pub mod sequence;
pub mod voices;
#[cfg(test)]
mod testutil;
