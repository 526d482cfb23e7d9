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
// Shared context for the audio core. Carries the backend handle, the voice pool
// registry and pool sizing so call sites don't thread many separate arguments.
//

use std::sync::Arc;

use tracing::info;

use super::{Backend, BusId};
use crate::samples::SampleBuffer;
use crate::voices::{PoolConfig, PoolError, VoicePool, VoicePoolRegistry};

/// Context passed to everything that creates audio resources. There is one per backend,
/// created at startup and shut down once at exit; clones share the same backend and
/// registry.
#[derive(Clone)]
pub struct AudioContext {
    /// The backend every bus and voice is created on.
    backend: Arc<dyn Backend>,
    /// Tracks every live voice pool for teardown.
    registry: Arc<VoicePoolRegistry>,
    /// Sizing for new pools.
    pool_config: PoolConfig,
}

impl AudioContext {
    /// Builds a context around the given backend with a fresh registry.
    pub fn new(backend: Arc<dyn Backend>, pool_config: PoolConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(VoicePoolRegistry::new()),
            pool_config,
        }
    }

    /// Creates a registered pool for the sample on the given bus, at the configured
    /// initial size.
    pub fn create_pool(
        &self,
        name: &str,
        sample: Arc<SampleBuffer>,
        bus: BusId,
    ) -> Result<Arc<VoicePool>, PoolError> {
        self.registry.create(
            name,
            self.backend.clone(),
            sample,
            bus,
            self.pool_config.initial_size(),
            &self.pool_config,
        )
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<VoicePoolRegistry> {
        &self.registry
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Tears down every pool still registered. Called once at exit.
    pub fn shutdown(&self) {
        info!(backend = %self.backend, "Shutting down audio context");
        self.registry.shutdown_all();
    }
}
