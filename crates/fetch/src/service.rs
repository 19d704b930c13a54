//! Request orchestration: validate, key, look up, dispatch, store, record.

use crate::dispatcher::SingleFlightDispatcher;
use crate::executor::{FetchExecutor, ProcessExecutor};
use crate::source::SourceKind;
use audiograb_cache::{compute_key, CacheEntry, CacheKey, CacheStore};
use audiograb_core::{
    CoreConfig, DownloadOutcome, FetchError, FetchRequest, Owner, RecordId, StorageError,
    ToolConfig, STAGING_DIR,
};
use audiograb_storage::{HistorySink, StorageLayout};
use audiograb_utils::{copy_atomic, retry_async, RetryPolicy};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Result handed back for a fetch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Cached copy of the media
    pub file_path: PathBuf,
    /// Copy inside the owner's folder, when it could be placed there
    pub stored_path: Option<PathBuf>,
    /// Filename to present to the user
    pub served_filename: String,
    pub cache_hit: bool,
}

/// Executor to use for each source
#[derive(Clone, Default)]
pub struct Executors {
    by_source: HashMap<SourceKind, Arc<dyn FetchExecutor>>,
}

impl Executors {
    /// One `ProcessExecutor` per source, from the configured tool binaries
    pub fn from_tools(tools: &ToolConfig) -> Self {
        SourceKind::ALL
            .into_iter()
            .fold(Self::default(), |set, kind| {
                set.with(kind, Arc::new(ProcessExecutor::new(kind.tool_spec(tools))))
            })
    }

    /// The same executor for every source
    pub fn uniform(executor: Arc<dyn FetchExecutor>) -> Self {
        SourceKind::ALL
            .into_iter()
            .fold(Self::default(), |set, kind| set.with(kind, Arc::clone(&executor)))
    }

    pub fn with(mut self, kind: SourceKind, executor: Arc<dyn FetchExecutor>) -> Self {
        self.by_source.insert(kind, executor);
        self
    }

    fn get(&self, kind: SourceKind) -> Option<Arc<dyn FetchExecutor>> {
        self.by_source.get(&kind).cloned()
    }
}

struct ServiceInner {
    cache: Arc<CacheStore>,
    layout: StorageLayout,
    executors: Executors,
    history: Option<Arc<dyn HistorySink>>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
}

/// Turns fetch requests into files in owner storage and the cache.
///
/// Concurrent misses on one key share a single execution. Every attempt
/// that passes URL validation is recorded in history; history outages are
/// logged and never change the result.
pub struct FetchService {
    inner: Arc<ServiceInner>,
    dispatcher: SingleFlightDispatcher<FetchOutcome>,
}

impl FetchService {
    /// History calls retry with `history_retry_attempts` and
    /// `history_retry_delay` from `config`.
    pub fn new(
        config: &CoreConfig,
        cache: Arc<CacheStore>,
        layout: StorageLayout,
        executors: Executors,
        history: Option<Arc<dyn HistorySink>>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                cache,
                layout,
                executors,
                history,
                retry: RetryPolicy::new(config.history_retry_attempts, config.history_retry_delay),
                fetch_timeout: config.fetch_timeout,
            }),
            dispatcher: SingleFlightDispatcher::new(config.worker_pool_size),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.dispatcher.in_flight_count()
    }

    pub fn available_workers(&self) -> usize {
        self.dispatcher.available_workers()
    }

    /// Fetch, inferring the source from the URL host
    pub async fn fetch_detected(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let source = SourceKind::detect(&request.url).ok_or_else(|| {
            FetchError::invalid_source(request.url.trim(), "not a Spotify, YouTube or SoundCloud URL")
        })?;
        self.fetch(request, source).await
    }

    pub async fn fetch(
        &self,
        request: &FetchRequest,
        source: SourceKind,
    ) -> Result<FetchOutcome, FetchError> {
        source.validate(&request.url)?;
        let url = request.url.trim().to_string();
        let owner = request.owner.clone();
        let key = compute_key(&url, &owner);

        if let Some(entry) = self.inner.cache.lookup(&key) {
            tracing::debug!(%key, %owner, %url, "cache hit");
            return Ok(self.inner.serve_cached(&owner, &url, entry).await);
        }
        tracing::debug!(%key, %owner, %url, "cache miss");

        let inner = Arc::clone(&self.inner);
        self.dispatcher
            .dispatch(key.clone(), move || async move {
                inner.run_fetch(key, owner, url, source).await
            })
            .await
    }
}

impl ServiceInner {
    async fn run_fetch(
        &self,
        key: CacheKey,
        owner: Owner,
        url: String,
        source: SourceKind,
    ) -> Result<FetchOutcome, FetchError> {
        // Another flight may have filled the entry since the caller looked
        if let Some(entry) = self.cache.lookup(&key) {
            tracing::debug!(%key, "cache filled while queued");
            return Ok(self.serve_cached(&owner, &url, entry).await);
        }

        let record = self.record_attempt(&owner, &url).await;
        let result = self.fetch_into_storage(&key, &owner, &url, source).await;

        let outcome = match &result {
            Ok(fetched) => {
                tracing::info!(
                    %key,
                    %owner,
                    %url,
                    file = %fetched.served_filename,
                    "fetch completed"
                );
                DownloadOutcome::Success {
                    filename: fetched.served_filename.clone(),
                }
            }
            Err(e) => {
                tracing::warn!(%key, %owner, %url, kind = e.kind(), "fetch failed: {e}");
                DownloadOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        if let Some(id) = record {
            self.record_outcome(id, outcome).await;
        }
        result
    }

    async fn fetch_into_storage(
        &self,
        key: &CacheKey,
        owner: &Owner,
        url: &str,
        source: SourceKind,
    ) -> Result<FetchOutcome, FetchError> {
        let executor = self.executors.get(source).ok_or_else(|| {
            FetchError::tool_failure(source.as_str(), None, "no tool configured for this source")
        })?;

        let staging_root = self.cache.dir().join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging_root)
            .await
            .map_err(|e| FetchError::storage(&staging_root, "create staging directory", e))?;
        // Removed on drop, whatever happens below
        let staging = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&staging_root)
            .map_err(|e| FetchError::storage(&staging_root, "create staging directory", e))?;

        let produced = executor
            .execute(url, staging.path(), self.fetch_timeout)
            .await?;
        let served_filename = produced
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| StorageError::other(&produced, "name output", "file name is not UTF-8"))?;

        let stored = self.layout.folder_for(owner)?.join(&served_filename);
        copy_atomic(&produced, &stored).await?;
        let entry = self
            .cache
            .put(key, &produced, &served_filename)
            .await?;

        Ok(FetchOutcome {
            file_path: entry.file_path,
            stored_path: Some(stored),
            served_filename,
            cache_hit: false,
        })
    }

    /// Answer from the cache, putting the owner's copy back if it was removed
    async fn serve_cached(&self, owner: &Owner, url: &str, entry: CacheEntry) -> FetchOutcome {
        let served_filename = entry.display_name.clone();
        let stored_path = self.restore_owner_copy(owner, &served_filename, &entry).await;

        if let Some(id) = self.record_attempt(owner, url).await {
            self.record_outcome(
                id,
                DownloadOutcome::Success {
                    filename: served_filename.clone(),
                },
            )
            .await;
        }

        FetchOutcome {
            file_path: entry.file_path,
            stored_path,
            served_filename,
            cache_hit: true,
        }
    }

    async fn restore_owner_copy(
        &self,
        owner: &Owner,
        name: &str,
        entry: &CacheEntry,
    ) -> Option<PathBuf> {
        if let Some(existing) = self.layout.locate(owner, name) {
            return Some(existing);
        }
        let restored = async {
            let dest = self.layout.folder_for(owner)?.join(name);
            copy_atomic(&entry.file_path, &dest).await?;
            Ok::<_, StorageError>(dest)
        };
        match restored.await {
            Ok(dest) => {
                tracing::debug!(%owner, file = name, "owner copy restored from cache");
                Some(dest)
            }
            Err(e) => {
                tracing::warn!(%owner, "Failed to restore owner copy: {e}");
                None
            }
        }
    }

    async fn record_attempt(&self, owner: &Owner, url: &str) -> Option<RecordId> {
        let history = self.history.as_ref()?;
        match retry_async(&self.retry, || history.record_attempt(owner, url)).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(%owner, %url, "Failed to record download attempt: {e}");
                None
            }
        }
    }

    async fn record_outcome(&self, id: RecordId, outcome: DownloadOutcome) {
        let Some(history) = self.history.as_ref() else {
            return;
        };
        if let Err(e) = retry_async(&self.retry, || history.record_outcome(id, outcome.clone())).await
        {
            tracing::error!(record = %id, "Failed to record download outcome: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use audiograb_core::{DownloadStatus, OwnerKey};
    use audiograb_storage::MemoryHistory;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct WritesFile {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchExecutor for WritesFile {
        async fn execute(
            &self,
            _url: &str,
            dest_dir: &Path,
            _timeout: Duration,
        ) -> Result<PathBuf, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = dest_dir.join("Artist - Title.mp3");
            std::fs::write(&path, b"audio").unwrap();
            Ok(path)
        }
    }

    struct Setup {
        temp: TempDir,
        layout: StorageLayout,
        history: Arc<MemoryHistory>,
        executor: Arc<WritesFile>,
        service: FetchService,
    }

    fn setup() -> Setup {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::with_root(temp.path());
        let layout = StorageLayout::from_config(&config);
        let cache = Arc::new(CacheStore::open(config.cache_dir()).unwrap());
        let history = Arc::new(MemoryHistory::new());
        let executor = Arc::new(WritesFile {
            calls: AtomicUsize::new(0),
        });
        let service = FetchService::new(
            &config,
            cache,
            layout.clone(),
            Executors::uniform(executor.clone()),
            Some(history.clone()),
        );
        Setup {
            temp,
            layout,
            history,
            executor,
            service,
        }
    }

    fn alice() -> Owner {
        Owner::User(OwnerKey::parse("alice").unwrap())
    }

    #[tokio::test]
    async fn miss_fetches_stores_and_records() {
        let s = setup();
        let request = FetchRequest::new("https://youtu.be/a", alice());

        let outcome = s.service.fetch(&request, SourceKind::YouTube).await.unwrap();

        assert!(!outcome.cache_hit);
        assert_eq!(outcome.served_filename, "Artist - Title.mp3");
        assert!(outcome.file_path.exists());
        assert_eq!(
            outcome.stored_path,
            s.layout.locate(&alice(), "Artist - Title.mp3")
        );

        let records = s.history.list(&alice(), 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, DownloadStatus::Success);
        assert_eq!(records[0].filename.as_deref(), Some("Artist - Title.mp3"));
    }

    #[tokio::test]
    async fn hit_skips_executor_and_restores_owner_copy() {
        let s = setup();
        let request = FetchRequest::new("https://youtu.be/a", alice());
        let first = s.service.fetch(&request, SourceKind::YouTube).await.unwrap();
        std::fs::remove_file(first.stored_path.unwrap()).unwrap();

        let second = s.service.fetch(&request, SourceKind::YouTube).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.file_path, first.file_path);
        assert_eq!(s.executor.calls.load(Ordering::SeqCst), 1);
        assert!(s.layout.locate(&alice(), "Artist - Title.mp3").is_some());
        assert_eq!(s.history.stats(&alice()).await.unwrap().successful, 2);
    }

    #[tokio::test]
    async fn hit_after_reopening_the_cache_serves_the_original_name() {
        let s = setup();
        let request = FetchRequest::new("https://youtu.be/a", alice());
        let first = s.service.fetch(&request, SourceKind::YouTube).await.unwrap();

        let config = CoreConfig::with_root(s.temp.path());
        let reopened = FetchService::new(
            &config,
            Arc::new(CacheStore::open(config.cache_dir()).unwrap()),
            s.layout.clone(),
            Executors::uniform(s.executor.clone()),
            Some(s.history.clone()),
        );
        let second = reopened.fetch(&request, SourceKind::YouTube).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.file_path, first.file_path);
        assert_eq!(second.served_filename, "Artist - Title.mp3");
        assert_eq!(second.stored_path, first.stored_path);
        assert_eq!(s.executor.calls.load(Ordering::SeqCst), 1);

        let latest = s.history.latest_success(&alice()).await.unwrap().unwrap();
        let filename = latest.filename.unwrap();
        assert_eq!(filename, "Artist - Title.mp3");
        assert!(s.layout.locate(&alice(), &filename).is_some());
    }

    #[tokio::test]
    async fn invalid_source_touches_nothing() {
        let s = setup();
        let request = FetchRequest::new("https://example.com/song", alice());

        let err = s.service.fetch(&request, SourceKind::YouTube).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_source");
        let err = s.service.fetch_detected(&request).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_source");

        assert_eq!(s.executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(s.history.stats(&alice()).await.unwrap().total, 0);
        assert_eq!(s.service.available_workers(), 4);
    }

    #[tokio::test]
    async fn staging_is_cleaned_up() {
        let s = setup();
        let request = FetchRequest::new("https://open.spotify.com/track/1", Owner::Shared);
        s.service.fetch_detected(&request).await.unwrap();

        let staging = s.layout.downloads_dir().parent().unwrap().join("cache").join(STAGING_DIR);
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }
}
