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

//! Pools of reusable backend voices.
//!
//! Every instrument (and the metronome) plays through a [`VoicePool`]: a growable set of
//! voices bound to one sample and one output bus. Triggering a note picks the first idle
//! voice instead of allocating one, so overlapping hits of the same sound never wait on
//! the backend. Pools are created and torn down only through the [`VoicePoolRegistry`].

mod pool;
mod registry;

pub use pool::VoicePool;
pub use registry::VoicePoolRegistry;

use crate::audio::AudioError;

/// The default smallest pool size.
pub const DEFAULT_MIN_VOICES: usize = 16;

/// The default largest initial pool size. Pools may still grow past this.
pub const DEFAULT_MAX_VOICES: usize = 48;

/// The default number of voices added when a pool runs out.
pub const DEFAULT_GROW_BY: usize = 6;

/// Pool sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// The smallest number of voices a pool is created with.
    min_size: usize,
    /// The largest number of voices a pool is created with.
    max_size: usize,
    /// The initial size used by owners that don't ask for a specific one.
    initial_size: usize,
    /// The number of voices added when every voice is busy.
    grow_by: usize,
}

impl PoolConfig {
    /// Creates a pool configuration. A zero growth increment is raised to one and the
    /// bounds are reordered if given backwards.
    pub fn new(min_size: usize, max_size: usize, initial_size: usize, grow_by: usize) -> Self {
        let (min_size, max_size) = if min_size <= max_size {
            (min_size.max(1), max_size.max(1))
        } else {
            (max_size.max(1), min_size.max(1))
        };
        PoolConfig {
            min_size,
            max_size,
            initial_size: initial_size.clamp(min_size, max_size),
            grow_by: grow_by.max(1),
        }
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    pub fn grow_by(&self) -> usize {
        self.grow_by
    }

    /// Clamps a requested pool size to the configured range.
    pub fn clamp_size(&self, size: usize) -> usize {
        size.clamp(self.min_size, self.max_size)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::new(
            DEFAULT_MIN_VOICES,
            DEFAULT_MAX_VOICES,
            DEFAULT_MIN_VOICES,
            DEFAULT_GROW_BY,
        )
    }
}

/// Errors raised by voice pools.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("unable to create voice for pool {pool}: {source}")]
    Voice {
        pool: String,
        #[source]
        source: AudioError,
    },

    #[error("unable to play on pool {pool}: {source}")]
    Play {
        pool: String,
        #[source]
        source: AudioError,
    },

    #[error("pool {0} has been destroyed")]
    Destroyed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size(), 16);
        assert_eq!(config.max_size(), 48);
        assert_eq!(config.initial_size(), 16);
        assert_eq!(config.grow_by(), 6);
    }

    #[test]
    fn test_pool_config_normalizes() {
        let config = PoolConfig::new(48, 16, 100, 0);
        assert_eq!(config.min_size(), 16);
        assert_eq!(config.max_size(), 48);
        assert_eq!(config.initial_size(), 48);
        assert_eq!(config.grow_by(), 1);

        assert_eq!(config.clamp_size(2), 16);
        assert_eq!(config.clamp_size(20), 20);
        assert_eq!(config.clamp_size(200), 48);
    }
}
