//! Picks the file to serve for a download request.

use crate::history::HistorySink;
use crate::layout::StorageLayout;
use audiograb_core::{Owner, ResolveError};
use std::path::PathBuf;
use std::sync::Arc;

/// A file ready to be sent to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub served_filename: String,
}

pub struct DownloadResolver {
    layout: StorageLayout,
    history: Option<Arc<dyn HistorySink>>,
}

impl DownloadResolver {
    pub fn new(layout: StorageLayout, history: Option<Arc<dyn HistorySink>>) -> Self {
        Self { layout, history }
    }

    /// Resolve in order: the explicit filename, the latest successful history
    /// record whose file still exists, the most recently modified media file.
    pub async fn resolve_file(
        &self,
        owner: &Owner,
        explicit_filename: Option<&str>,
    ) -> Result<ResolvedFile, ResolveError> {
        if let Some(filename) = explicit_filename {
            return self
                .layout
                .locate(owner, filename)
                .map(|path| ResolvedFile {
                    path,
                    served_filename: filename.to_string(),
                })
                .ok_or_else(|| ResolveError::NotFound {
                    filename: filename.to_string(),
                });
        }

        if let Some(found) = self.from_history(owner).await {
            return Ok(found);
        }

        let newest = self.layout.list_owner_media(owner)?.into_iter().next();
        newest
            .map(|media| ResolvedFile {
                path: media.path,
                served_filename: media.name,
            })
            .ok_or(ResolveError::NoFilesAvailable)
    }

    async fn from_history(&self, owner: &Owner) -> Option<ResolvedFile> {
        let history = self.history.as_ref()?;
        let record = match history.latest_success(owner).await {
            Ok(record) => record?,
            Err(e) => {
                // History is advisory here; the directory listing still works
                tracing::warn!(%owner, "history lookup failed, falling back to listing: {e}");
                return None;
            }
        };
        let filename = record.filename?;
        match self.layout.locate(owner, &filename) {
            Some(path) => Some(ResolvedFile {
                path,
                served_filename: filename,
            }),
            None => {
                tracing::debug!(%owner, %filename, "history file no longer on disk");
                None
            }
        }
    }
}
