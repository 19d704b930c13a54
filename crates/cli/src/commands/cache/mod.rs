use crate::app::App;
use crate::error::CommandError;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Remove every cache entry
    Clear,
    /// Show cache statistics
    Stats,
}

impl CacheCommands {
    pub fn execute(self, app: &App) -> Result<(), CommandError> {
        match self {
            CacheCommands::Clear => {
                let stats = app.cache.clear();
                if stats.failed > 0 {
                    tracing::warn!("{} cache files could not be removed", stats.failed);
                }
                tracing::info!("✓ Cache cleared ({} entries removed)", stats.evicted);
                Ok(())
            }
            CacheCommands::Stats => {
                tracing::info!("Cache Statistics:");
                tracing::info!("  Directory: {}", app.cache.dir().display());
                tracing::info!("  Entries: {}", app.cache.len());
                tracing::info!("  TTL: {}s", app.config.cache_ttl.as_secs());
                tracing::info!("  Workers: {}", app.service.available_workers());
                Ok(())
            }
        }
    }
}
