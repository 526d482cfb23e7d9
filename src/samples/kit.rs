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
use std::sync::Arc;

use super::SampleBuffer;

/// A drum kit: an ordered set of named instruments, each backed by one decoded sample.
#[derive(Clone, Debug, Default)]
pub struct Kit {
    name: String,
    instruments: Vec<(String, Arc<SampleBuffer>)>,
}

impl Kit {
    /// Creates an empty kit.
    pub fn new(name: &str) -> Kit {
        Kit {
            name: name.to_string(),
            instruments: Vec::new(),
        }
    }

    /// Returns the kit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an instrument, replacing the sample of an existing instrument with the same name.
    pub fn insert(&mut self, instrument: &str, sample: Arc<SampleBuffer>) {
        match self.instruments.iter_mut().find(|(name, _)| name == instrument) {
            Some(entry) => entry.1 = sample,
            None => self.instruments.push((instrument.to_string(), sample)),
        }
    }

    /// Gets the sample for an instrument.
    pub fn get(&self, instrument: &str) -> Option<&Arc<SampleBuffer>> {
        self.instruments
            .iter()
            .find(|(name, _)| name == instrument)
            .map(|(_, sample)| sample)
    }

    /// Iterates over the instruments in insertion order.
    pub fn instruments(&self) -> impl Iterator<Item = (&str, &Arc<SampleBuffer>)> {
        self.instruments
            .iter()
            .map(|(name, sample)| (name.as_str(), sample))
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
