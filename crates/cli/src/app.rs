//! Explicit construction and teardown of the core components.

use crate::error::CommandError;
use audiograb_cache::{CacheStore, EvictionSweeper, SweeperHandle};
use audiograb_core::CoreConfig;
use audiograb_fetch::{Executors, FetchService};
use audiograb_storage::{
    ArchiveBuilder, DownloadResolver, HistorySink, JsonFileHistory, StorageLayout,
};
use std::sync::Arc;

/// Everything a command needs, built once per process
pub struct App {
    pub config: CoreConfig,
    pub layout: StorageLayout,
    pub cache: Arc<CacheStore>,
    pub history: Arc<dyn HistorySink>,
    pub service: FetchService,
    pub resolver: DownloadResolver,
    pub archives: ArchiveBuilder,
    pub sweeper: EvictionSweeper,
    sweeper_handle: SweeperHandle,
}

impl App {
    /// Build the core with the configured external tools
    pub fn start(config: CoreConfig) -> Result<Self, CommandError> {
        let executors = Executors::from_tools(&config.tools);
        Self::with_executors(config, executors)
    }

    /// Build the core around the given executors. Must run inside a Tokio
    /// runtime since the sweeper task is spawned here.
    pub fn with_executors(config: CoreConfig, executors: Executors) -> Result<Self, CommandError> {
        config.validate()?;

        let layout = StorageLayout::from_config(&config);
        let cache = Arc::new(CacheStore::open(config.cache_dir())?);
        let history: Arc<dyn HistorySink> = Arc::new(JsonFileHistory::open(config.history_file())?);

        let service = FetchService::new(
            &config,
            Arc::clone(&cache),
            layout.clone(),
            executors,
            Some(Arc::clone(&history)),
        );
        let resolver = DownloadResolver::new(layout.clone(), Some(Arc::clone(&history)));
        let archives = ArchiveBuilder::new(layout.clone(), config.archive_size_cap_bytes);
        let sweeper = EvictionSweeper::new(
            Arc::clone(&cache),
            layout.clone(),
            config.cache_ttl,
            config.sweep_interval,
        );
        let sweeper_handle = sweeper.clone().start();

        tracing::debug!(
            root = %config.root_dir.display(),
            workers = config.worker_pool_size,
            cached = cache.len(),
            "core started"
        );

        Ok(Self {
            config,
            layout,
            cache,
            history,
            service,
            resolver,
            archives,
            sweeper,
            sweeper_handle,
        })
    }

    /// Stop background work
    pub async fn shutdown(self) {
        self.sweeper_handle.shutdown().await;
        tracing::debug!("core stopped");
    }
}
