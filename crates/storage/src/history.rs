//! Download history sink.
//!
//! The core only appends attempts, finishes them once, and reads them back for
//! resolution and reporting. Two backends are provided: an in-process one and
//! a JSON file rewritten atomically on every change.

use async_trait::async_trait;
use audiograb_core::{
    DownloadOutcome, DownloadStatus, HistoryError, HistoryRecord, HistoryStats, Owner, RecordId,
};
use audiograb_utils::write_atomic;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Open a `pending` record for a fetch attempt
    async fn record_attempt(&self, owner: &Owner, url: &str) -> Result<RecordId, HistoryError>;

    /// Finish a pending record; a record can be finished only once
    async fn record_outcome(
        &self,
        id: RecordId,
        outcome: DownloadOutcome,
    ) -> Result<(), HistoryError>;

    /// Most recent successful record for the owner
    async fn latest_success(&self, owner: &Owner) -> Result<Option<HistoryRecord>, HistoryError>;

    /// Owner's records, newest first
    async fn list(
        &self,
        owner: &Owner,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError>;

    async fn stats(&self, owner: &Owner) -> Result<HistoryStats, HistoryError>;

    /// Delete one record, or all of the owner's records when `id` is `None`.
    /// Returns how many records were removed.
    async fn clear(&self, owner: &Owner, id: Option<RecordId>) -> Result<usize, HistoryError>;
}

/// Records plus the id counter, shared by both backends
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct HistoryBook {
    next_id: u64,
    records: Vec<HistoryRecord>,
}

impl HistoryBook {
    fn open(&mut self, owner: &Owner, url: &str) -> RecordId {
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.records
            .push(HistoryRecord::pending(id, owner.clone(), url));
        id
    }

    fn finish(&mut self, id: RecordId, outcome: DownloadOutcome) -> Result<(), HistoryError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(HistoryError::UnknownRecord { id: id.0 })?;
        if record.status != DownloadStatus::Pending {
            return Err(HistoryError::AlreadyFinished {
                id: id.0,
                status: record.status.to_string(),
            });
        }
        record.finish(outcome);
        Ok(())
    }

    fn newest_first<'a>(&'a self, owner: &'a Owner) -> Vec<&'a HistoryRecord> {
        let mut records: Vec<_> = self.records.iter().filter(|r| &r.owner == owner).collect();
        // Stable: equal timestamps keep insertion order, reversed
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    fn latest_success(&self, owner: &Owner) -> Option<HistoryRecord> {
        self.newest_first(owner)
            .into_iter()
            .find(|r| r.status == DownloadStatus::Success)
            .cloned()
    }

    fn page(&self, owner: &Owner, limit: usize, offset: usize) -> Vec<HistoryRecord> {
        self.newest_first(owner)
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn stats(&self, owner: &Owner) -> HistoryStats {
        self.records
            .iter()
            .filter(|r| &r.owner == owner)
            .fold(HistoryStats::default(), |mut stats, r| {
                stats.total += 1;
                match r.status {
                    DownloadStatus::Success => stats.successful += 1,
                    DownloadStatus::Failed => stats.failed += 1,
                    DownloadStatus::Pending => {}
                }
                stats
            })
    }

    fn clear(&mut self, owner: &Owner, id: Option<RecordId>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| !(&r.owner == owner && id.map_or(true, |id| r.id == id)));
        before - self.records.len()
    }
}

/// History kept in process memory
#[derive(Debug, Default)]
pub struct MemoryHistory {
    book: RwLock<HistoryBook>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record_attempt(&self, owner: &Owner, url: &str) -> Result<RecordId, HistoryError> {
        Ok(self.book.write().open(owner, url))
    }

    async fn record_outcome(
        &self,
        id: RecordId,
        outcome: DownloadOutcome,
    ) -> Result<(), HistoryError> {
        self.book.write().finish(id, outcome)
    }

    async fn latest_success(&self, owner: &Owner) -> Result<Option<HistoryRecord>, HistoryError> {
        Ok(self.book.read().latest_success(owner))
    }

    async fn list(
        &self,
        owner: &Owner,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.book.read().page(owner, limit, offset))
    }

    async fn stats(&self, owner: &Owner) -> Result<HistoryStats, HistoryError> {
        Ok(self.book.read().stats(owner))
    }

    async fn clear(&self, owner: &Owner, id: Option<RecordId>) -> Result<usize, HistoryError> {
        Ok(self.book.write().clear(owner, id))
    }
}

/// History persisted to a JSON file.
///
/// The whole book is rewritten with write-and-rename after each mutation, so
/// the file on disk is always a complete snapshot. Writes run on the blocking
/// pool.
#[derive(Debug)]
pub struct JsonFileHistory {
    file: Arc<HistoryFile>,
}

#[derive(Debug)]
struct HistoryFile {
    path: PathBuf,
    book: Mutex<HistoryBook>,
}

impl HistoryFile {
    /// Apply `change` and persist; the in-memory book is only updated when
    /// the write succeeds.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut HistoryBook) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let mut book = self.book.lock();
        let mut next = book.clone();
        let value = change(&mut next)?;
        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| HistoryError::backend("serialize", e.to_string()))?;
        write_atomic(&self.path, &bytes).map_err(|e| HistoryError::backend("persist", e.to_string()))?;
        *book = next;
        Ok(value)
    }
}

impl JsonFileHistory {
    /// Load `path` if it exists, otherwise start empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let book = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| HistoryError::backend("load", format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HistoryBook::default(),
            Err(e) => {
                return Err(HistoryError::backend(
                    "load",
                    format!("{}: {e}", path.display()),
                ))
            }
        };
        Ok(Self {
            file: Arc::new(HistoryFile {
                path,
                book: Mutex::new(book),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    async fn mutate<T, F>(&self, change: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut HistoryBook) -> Result<T, HistoryError> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.mutate(change))
            .await
            .map_err(|e| HistoryError::backend("persist", e.to_string()))?
    }
}

#[async_trait]
impl HistorySink for JsonFileHistory {
    async fn record_attempt(&self, owner: &Owner, url: &str) -> Result<RecordId, HistoryError> {
        let owner = owner.clone();
        let url = url.to_string();
        self.mutate(move |book| Ok(book.open(&owner, &url))).await
    }

    async fn record_outcome(
        &self,
        id: RecordId,
        outcome: DownloadOutcome,
    ) -> Result<(), HistoryError> {
        self.mutate(move |book| book.finish(id, outcome)).await
    }

    async fn latest_success(&self, owner: &Owner) -> Result<Option<HistoryRecord>, HistoryError> {
        Ok(self.file.book.lock().latest_success(owner))
    }

    async fn list(
        &self,
        owner: &Owner,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.file.book.lock().page(owner, limit, offset))
    }

    async fn stats(&self, owner: &Owner) -> Result<HistoryStats, HistoryError> {
        Ok(self.file.book.lock().stats(owner))
    }

    async fn clear(&self, owner: &Owner, id: Option<RecordId>) -> Result<usize, HistoryError> {
        let owner = owner.clone();
        self.mutate(move |book| Ok(book.clear(&owner, id))).await
    }
}
