//! Background TTL sweep over the cache and the archive temp namespace.

use crate::store::CacheStore;
use audiograb_storage::StorageLayout;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// What a single sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub failed: usize,
    pub archives_pruned: usize,
}

#[derive(Debug, Clone)]
pub struct EvictionSweeper {
    store: Arc<CacheStore>,
    layout: StorageLayout,
    ttl: Duration,
    interval: Duration,
}

impl EvictionSweeper {
    pub fn new(
        store: Arc<CacheStore>,
        layout: StorageLayout,
        ttl: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            layout,
            ttl,
            interval,
        }
    }

    /// One pass: expire cache entries, then prune leftover archives.
    /// Failures are per entry and never stop the pass.
    pub fn run_once(&self) -> SweepReport {
        self.run_at(SystemTime::now())
    }

    fn run_at(&self, now: SystemTime) -> SweepReport {
        let stats = self.store.evict_at(now, self.ttl);
        let archives_pruned = prune_older_than(&self.layout.temp_dir(), now, self.ttl);

        let report = SweepReport {
            evicted: stats.evicted,
            failed: stats.failed,
            archives_pruned,
        };
        if report != SweepReport::default() {
            tracing::info!(
                evicted = report.evicted,
                failed = report.failed,
                archives_pruned = report.archives_pruned,
                "sweep finished"
            );
        }
        report
    }

    /// Run `run_once` every interval in a background task.
    ///
    /// A zero interval starts nothing. The task stops when the returned
    /// handle is dropped or shut down.
    pub fn start(self) -> SweeperHandle {
        if self.interval == Duration::ZERO {
            tracing::debug!("sweeper disabled");
            return SweeperHandle { task: None };
        }

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let sweeper = self.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || sweeper.run_once()).await {
                    tracing::warn!("Cache sweep task failed: {}", e);
                }
            }
        });

        SweeperHandle { task: Some(task) }
    }
}

/// Delete regular files in `dir` older than `ttl`. Returns how many went.
fn prune_older_than(dir: &Path, now: SystemTime, ttl: Duration) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("Failed to read archive directory {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut pruned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let expired = entry
            .metadata()
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > ttl);
        if !expired {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => pruned += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove stale archive {}: {}", path.display(), e),
        }
    }
    pruned
}

/// Owns the background sweep task
#[derive(Debug)]
pub struct SweeperHandle {
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the task and wait for it to wind down
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::compute_key;
    use audiograb_core::{Owner, OwnerKey};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    struct Fixture {
        _temp: TempDir,
        store: Arc<CacheStore>,
        layout: StorageLayout,
        source: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::open(temp.path().join("cache")).unwrap());
        let layout = StorageLayout::new(temp.path().join("downloads"));
        let source = temp.path().join("fetched.mp3");
        fs::write(&source, b"audio").unwrap();
        Fixture {
            _temp: temp,
            store,
            layout,
            source,
        }
    }

    #[tokio::test]
    async fn sweep_evicts_stale_entries_and_archives() {
        let fx = fixture();
        let owner = Owner::User(OwnerKey::parse("alice").unwrap());
        let key = compute_key("https://youtu.be/a", &owner);
        fx.store.put(&key, &fx.source, "Song.mp3").await.unwrap();

        let temp_dir = fx.layout.ensure_temp_dir().unwrap();
        fs::write(temp_dir.join("alice_20240101000000.zip"), b"PK").unwrap();

        let sweeper = EvictionSweeper::new(fx.store.clone(), fx.layout.clone(), DAY, Duration::ZERO);

        // Nothing is old yet
        assert_eq!(sweeper.run_once(), SweepReport::default());

        let report = sweeper.run_at(SystemTime::now() + DAY + Duration::from_secs(60));
        assert_eq!(
            report,
            SweepReport {
                evicted: 1,
                failed: 0,
                archives_pruned: 1
            }
        );
        assert!(fx.store.is_empty());
        assert!(fs::read_dir(&temp_dir).unwrap().next().is_none());

        // Idempotent
        assert_eq!(
            sweeper.run_at(SystemTime::now() + DAY * 2),
            SweepReport::default()
        );
    }

    #[tokio::test]
    async fn missing_file_entry_does_not_block_others() {
        let fx = fixture();
        let gone = compute_key("https://youtu.be/gone", &Owner::Shared);
        let kept = compute_key("https://youtu.be/kept", &Owner::Shared);
        let entry = fx.store.put(&gone, &fx.source, "Song.mp3").await.unwrap();
        fx.store.put(&kept, &fx.source, "Song.mp3").await.unwrap();
        fs::remove_file(entry.file_path).unwrap();

        let sweeper = EvictionSweeper::new(fx.store.clone(), fx.layout, DAY, Duration::ZERO);
        let report = sweeper.run_at(SystemTime::now() + DAY * 2);

        assert_eq!(report.evicted, 2);
        assert!(!fx.store.path_for(&kept).exists());
    }

    #[tokio::test]
    async fn zero_interval_starts_nothing() {
        let fx = fixture();
        let sweeper = EvictionSweeper::new(fx.store, fx.layout, DAY, Duration::ZERO);
        let handle = sweeper.start();
        assert!(!handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn background_task_runs_until_shutdown() {
        let fx = fixture();
        let key = compute_key("https://youtu.be/a", &Owner::Shared);
        fx.store.put(&key, &fx.source, "Song.mp3").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = EvictionSweeper::new(
            fx.store.clone(),
            fx.layout,
            Duration::ZERO,
            Duration::from_millis(20),
        );
        let handle = sweeper.start();
        assert!(handle.is_running());

        for _ in 0..100 {
            if fx.store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fx.store.is_empty());

        handle.shutdown().await;
    }
}
