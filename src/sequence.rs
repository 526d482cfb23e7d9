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

//! The musical data the scheduler walks.
//!
//! Time is measured on a fixed grid of [`SUBTICKS_PER_QUARTER`] subticks per quarter
//! note. A [`Pattern`] holds a [`Timeline`] and one track of step selections per kit
//! instrument; a [`Song`] arranges patterns by position; a [`Project`] ties them together
//! with the master level.

mod pattern;
mod project;
mod song;
mod timeline;

pub use pattern::{Pattern, PatternState, Track};
pub use project::Project;
pub use song::Song;
pub use timeline::{
    is_playable, StepGrid, TickRate, Timeline, DEFAULT_QUARTER_NOTES, MAX_QUARTER_NOTES,
    MIN_QUARTER_NOTES, SUBTICKS_PER_QUARTER,
};
