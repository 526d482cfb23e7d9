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
use std::collections::{BTreeMap, BTreeSet};

/// The arrangement: which patterns play at each song position. Positions start at 1 and
/// may select any number of patterns, including none.
#[derive(Clone, Debug, Default)]
pub struct Song {
    positions: BTreeMap<usize, BTreeSet<usize>>,
}

impl Song {
    pub fn new() -> Song {
        Song::default()
    }

    /// Selects a pattern at a position. Returns false for position 0 or if the pattern was
    /// already selected there.
    pub fn select(&mut self, position: usize, pattern: usize) -> bool {
        if position == 0 {
            return false;
        }
        self.positions.entry(position).or_default().insert(pattern)
    }

    /// Deselects a pattern at a position. Returns true if it was selected.
    pub fn deselect(&mut self, position: usize, pattern: usize) -> bool {
        let Some(patterns) = self.positions.get_mut(&position) else {
            return false;
        };
        let removed = patterns.remove(&pattern);
        if patterns.is_empty() {
            self.positions.remove(&position);
        }
        removed
    }

    /// Returns the patterns selected at a position, in pattern order.
    pub fn patterns_at(&self, position: usize) -> Vec<usize> {
        self.positions
            .get(&position)
            .map(|patterns| patterns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the highest position with a selection, or 0 for an empty song.
    pub fn max_position(&self) -> usize {
        self.positions.keys().next_back().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }
}
