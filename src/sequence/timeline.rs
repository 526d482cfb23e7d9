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

/// The number of subticks in a quarter note. Every supported subdivision lands on this
/// grid: 24 is divisible by 1, 2, 3, 4 and 8.
pub const SUBTICKS_PER_QUARTER: usize = 24;

pub const MIN_QUARTER_NOTES: usize = 1;
pub const MAX_QUARTER_NOTES: usize = 32;
pub const DEFAULT_QUARTER_NOTES: usize = 4;

/// A subdivision of the quarter note.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TickRate {
    Quarter,
    Eighth,
    EighthTriplet,
    #[default]
    Sixteenth,
    ThirtySecond,
}

impl TickRate {
    /// Every rate, coarsest first.
    pub const ALL: [TickRate; 5] = [
        TickRate::Quarter,
        TickRate::Eighth,
        TickRate::EighthTriplet,
        TickRate::Sixteenth,
        TickRate::ThirtySecond,
    ];

    /// The number of ticks in one quarter note.
    pub fn ticks_per_quarter(self) -> usize {
        match self {
            TickRate::Quarter => 1,
            TickRate::Eighth => 2,
            TickRate::EighthTriplet => 3,
            TickRate::Sixteenth => 4,
            TickRate::ThirtySecond => 8,
        }
    }

    /// Looks up a rate by its ticks per quarter note.
    pub fn from_ticks(ticks: usize) -> Option<TickRate> {
        TickRate::ALL
            .into_iter()
            .find(|rate| rate.ticks_per_quarter() == ticks)
    }

    /// The distance between ticks, in subticks.
    pub fn interval(self) -> usize {
        SUBTICKS_PER_QUARTER / self.ticks_per_quarter()
    }

    /// Returns true if the subtick position falls on one of this rate's ticks.
    pub fn contains(self, position: usize) -> bool {
        position < SUBTICKS_PER_QUARTER && position % self.interval() == 0
    }

    /// The subtick positions of this rate's ticks within a quarter note.
    pub fn positions(self) -> impl Iterator<Item = usize> {
        (0..SUBTICKS_PER_QUARTER).step_by(self.interval())
    }
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickRate::Quarter => "quarter",
            TickRate::Eighth => "eighth",
            TickRate::EighthTriplet => "eighth triplet",
            TickRate::Sixteenth => "sixteenth",
            TickRate::ThirtySecond => "thirty-second",
        };
        write!(f, "{}", name)
    }
}

/// Returns true if some supported rate has a tick at the subtick position. The scheduler
/// only does work on these positions.
pub fn is_playable(position: usize) -> bool {
    TickRate::ALL.into_iter().any(|rate| rate.contains(position))
}

/// The length and subdivision of a pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeline {
    quarter_notes: usize,
    rate: TickRate,
}

impl Timeline {
    pub fn new(quarter_notes: usize, ticks: usize) -> Timeline {
        let mut timeline = Timeline::default();
        timeline.set_quarter_notes(quarter_notes);
        timeline.set_ticks(ticks);
        timeline
    }

    pub fn quarter_notes(&self) -> usize {
        self.quarter_notes
    }

    /// Sets the pattern length, clamped to 1-32 quarter notes. Returns the length used.
    pub fn set_quarter_notes(&mut self, quarter_notes: usize) -> usize {
        self.quarter_notes = quarter_notes.clamp(MIN_QUARTER_NOTES, MAX_QUARTER_NOTES);
        self.quarter_notes
    }

    pub fn rate(&self) -> TickRate {
        self.rate
    }

    /// Sets the subdivision by ticks per quarter note. Patterns support 2, 3, 4 and 8;
    /// anything else becomes sixteenths. Returns the rate used.
    pub fn set_ticks(&mut self, ticks: usize) -> TickRate {
        self.rate = match TickRate::from_ticks(ticks) {
            Some(TickRate::Quarter) | None => TickRate::Sixteenth,
            Some(rate) => rate,
        };
        self.rate
    }

    /// Returns true if the pattern is long enough to play the given quarter note.
    pub fn covers(&self, quarter: usize) -> bool {
        quarter < self.quarter_notes
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Timeline {
            quarter_notes: DEFAULT_QUARTER_NOTES,
            rate: TickRate::default(),
        }
    }
}

/// Per-instrument step selections: a velocity for every selected (quarter, subtick).
/// Covers the longest possible pattern, so shortening and re-lengthening a pattern keeps
/// its steps.
#[derive(Clone)]
pub struct StepGrid {
    steps: Vec<Option<f32>>,
}

impl StepGrid {
    pub fn new() -> StepGrid {
        StepGrid {
            steps: vec![None; MAX_QUARTER_NOTES * SUBTICKS_PER_QUARTER],
        }
    }

    fn index(quarter: usize, position: usize) -> Option<usize> {
        (quarter < MAX_QUARTER_NOTES && position < SUBTICKS_PER_QUARTER)
            .then(|| quarter * SUBTICKS_PER_QUARTER + position)
    }

    /// Selects the step with a velocity clamped to [0, 1], or clears it with None.
    /// Returns false if the step is outside the grid.
    pub fn set(&mut self, quarter: usize, position: usize, velocity: Option<f32>) -> bool {
        let Some(index) = Self::index(quarter, position) else {
            return false;
        };
        self.steps[index] = velocity.map(|v| if v.is_nan() { 1.0 } else { v.clamp(0.0, 1.0) });
        true
    }

    /// Returns the velocity of a selected step.
    pub fn velocity(&self, quarter: usize, position: usize) -> Option<f32> {
        Self::index(quarter, position).and_then(|index| self.steps[index])
    }

    pub fn is_selected(&self, quarter: usize, position: usize) -> bool {
        self.velocity(quarter, position).is_some()
    }

    /// Returns the number of selected steps.
    pub fn selected_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_some()).count()
    }

    pub fn clear(&mut self) {
        self.steps.fill(None);
    }
}

impl Default for StepGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepGrid")
            .field("selected", &self.selected_count())
            .finish()
    }
}
