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
use std::fmt;

use crate::audio::Levels;

/// Which loop a session runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayMode {
    /// Loops the active pattern.
    Pattern,
    /// Walks the song positions, looping back to the start while running.
    Song,
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayMode::Pattern => write!(f, "pattern"),
            PlayMode::Song => write!(f, "song"),
        }
    }
}

/// Notifications from the scheduler workers, drained by the host on its own thread.
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    /// A session started.
    Started(PlayMode),
    /// A playable tick was committed. `pattern` is the active pattern in pattern mode
    /// and None in song mode.
    Tick {
        pattern: Option<usize>,
        quarter: usize,
        position: usize,
    },
    /// Song mode moved to a new position.
    SongPosition(usize),
    /// Running counter text for display, updated every quarter note.
    Counter(String),
    /// Peak output levels, posted periodically while running.
    Levels(Levels),
    /// A session ended, either because it was stopped or because there was nothing to
    /// play.
    Stopped(PlayMode),
}
