//! Process-wide shared resources
//!
//! Every cache instance in a process shares one encode pool, one set of
//! compression threads and one read-buffer registry. Tests and embedders
//! may also build isolated runtimes side by side.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use super::buffer_pool::ReadBufferPool;
use super::config::RuntimeConfig;
use super::encode_pool::SharedEncodePool;
use super::workers::CompressWorkers;
use crate::error::{Error, Result};

static GLOBAL: OnceCell<Arc<CacheRuntime>> = OnceCell::new();

/// Shared pools used by every [`CacheEngine`](super::CacheEngine).
#[derive(Debug)]
pub struct CacheRuntime {
    config: RuntimeConfig,
    workers: Arc<CompressWorkers>,
    encode_pool: SharedEncodePool,
    buffers: ReadBufferPool,
}

impl CacheRuntime {
    /// Build a runtime from a validated config
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config))
    }

    /// The process-wide runtime, created with defaults on first use
    pub fn global() -> Arc<CacheRuntime> {
        GLOBAL
            .get_or_init(|| Arc::new(Self::assemble(RuntimeConfig::default())))
            .clone()
    }

    /// Install a custom process-wide runtime. Fails once one exists.
    pub fn install_global(config: RuntimeConfig) -> Result<Arc<CacheRuntime>> {
        let runtime = Arc::new(Self::new(config)?);
        GLOBAL
            .set(runtime.clone())
            .map_err(|_| Error::Config("global cache runtime already initialized".into()))?;
        info!(
            slots = runtime.encode_pool.slot_count(),
            "Installed global cache runtime"
        );
        Ok(runtime)
    }

    fn assemble(config: RuntimeConfig) -> Self {
        let slots = config.slot_count();
        let workers = Arc::new(CompressWorkers::new(slots));
        Self {
            encode_pool: SharedEncodePool::new(slots, workers.clone()),
            buffers: ReadBufferPool::new(
                config.read_buffer_growth,
                config.sweep_interval(),
                config.shared_buffer_thread_prefix.clone(),
            ),
            workers,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn encode_pool(&self) -> &SharedEncodePool {
        &self.encode_pool
    }

    pub fn workers(&self) -> &CompressWorkers {
        &self.workers
    }

    pub fn buffers(&self) -> &ReadBufferPool {
        &self.buffers
    }
}
