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

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{PoolConfig, PoolError, VoicePool};
use crate::audio::{Backend, BusId};
use crate::samples::SampleBuffer;

/// Every live voice pool. Pools are created and torn down through the registry so that a
/// final [`VoicePoolRegistry::shutdown_all`] releases each one exactly once, even if its
/// owner never did.
///
/// One registry exists per [`AudioContext`](crate::audio::AudioContext).
#[derive(Default)]
pub struct VoicePoolRegistry {
    pools: Mutex<Vec<Arc<VoicePool>>>,
}

impl VoicePoolRegistry {
    pub fn new() -> VoicePoolRegistry {
        VoicePoolRegistry::default()
    }

    /// Creates and registers a pool. The initial size is clamped to the configured range.
    pub fn create(
        &self,
        name: &str,
        backend: Arc<dyn Backend>,
        sample: Arc<SampleBuffer>,
        bus: BusId,
        initial_size: usize,
        config: &PoolConfig,
    ) -> Result<Arc<VoicePool>, PoolError> {
        let pool = Arc::new(VoicePool::new(
            name,
            backend,
            sample,
            bus,
            config.clamp_size(initial_size),
            config.grow_by(),
        )?);
        self.pools.lock().push(pool.clone());
        Ok(pool)
    }

    /// Releases the pool's voices and unregisters it. The output bus is left alone so it
    /// can be reused by a replacement pool. Does nothing if the pool isn't registered.
    pub fn destroy(&self, pool: &VoicePool) {
        let removed = {
            let mut pools = self.pools.lock();
            let before = pools.len();
            pools.retain(|registered| registered.id() != pool.id());
            pools.len() != before
        };
        if removed {
            pool.destroy_voices();
        }
    }

    /// Releases the pool's voices and its output bus.
    pub fn shutdown(&self, pool: &VoicePool) {
        self.destroy(pool);
        pool.destroy_output_voice();
    }

    /// Shuts down every registered pool.
    pub fn shutdown_all(&self) {
        let pools: Vec<Arc<VoicePool>> = self.pools.lock().clone();
        if pools.is_empty() {
            return;
        }
        info!(pools = pools.len(), "Shutting down all voice pools");
        for pool in pools {
            debug!(pool = pool.name(), "Shutting down voice pool");
            self.shutdown(&pool);
        }
    }

    /// Returns true if the pool is registered.
    pub fn contains(&self, pool: &VoicePool) -> bool {
        self.pools
            .lock()
            .iter()
            .any(|registered| registered.id() == pool.id())
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }
}
