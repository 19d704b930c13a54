//! Error taxonomy shared by every audiograb crate.
//!
//! Each failure surface gets its own enum so callers can match on exactly the
//! outcomes an operation can produce. All of them expose a stable `kind()`
//! string which is what the request boundary reports to users, together with
//! the rendered message as free-text detail.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A filesystem failure, captured as text so that it can be cloned and shared
/// between every caller attached to the same fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage {operation} failed for '{}': {message}", .path.display())]
pub struct StorageError {
    pub path: PathBuf,
    pub operation: String,
    pub message: String,
    pub not_found: bool,
}

impl StorageError {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, operation: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            operation: operation.into(),
            not_found: source.kind() == std::io::ErrorKind::NotFound,
            message: source.to_string(),
        }
    }

    #[must_use]
    pub fn other(
        path: impl AsRef<Path>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            operation: operation.into(),
            message: message.into(),
            not_found: false,
        }
    }
}

/// Failures of a single fetch request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The URL does not belong to the source the caller asked for
    #[error("invalid source '{url}': {reason}")]
    InvalidSource { url: String, reason: String },

    /// The external tool exceeded its wall-clock budget and was killed
    #[error("fetch of '{url}' timed out after {}s", .after.as_secs())]
    Timeout { url: String, after: Duration },

    /// The external tool could not be started or exited unsuccessfully
    #[error("{}", format_tool_failure(.tool, .exit_code, .diagnostics))]
    ToolFailure {
        tool: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// The tool exited successfully but left no output file behind
    #[error("'{tool}' reported success but produced no .{extension} file")]
    NoOutputProduced { tool: String, extension: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The worker running the fetch went away before producing a result
    #[error("fetch worker failed: {message}")]
    WorkerLost { message: String },
}

fn format_tool_failure(tool: &str, exit_code: &Option<i32>, diagnostics: &str) -> String {
    let head = match exit_code {
        Some(code) => format!("'{tool}' failed with exit code {code}"),
        None => format!("'{tool}' failed"),
    };
    if diagnostics.is_empty() {
        head
    } else {
        format!("{head}: {diagnostics}")
    }
}

impl FetchError {
    #[must_use]
    pub fn invalid_source(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            url: url.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn tool_failure(
        tool: impl Into<String>,
        exit_code: Option<i32>,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            exit_code,
            diagnostics: diagnostics.into(),
        }
    }

    #[must_use]
    pub fn storage(
        path: impl AsRef<Path>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage(StorageError::new(path, operation, source))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSource { .. } => "invalid_source",
            Self::Timeout { .. } => "timeout",
            Self::ToolFailure { .. } => "tool_failure",
            Self::NoOutputProduced { .. } => "no_output_produced",
            Self::Storage(_) => "storage_io",
            Self::WorkerLost { .. } => "worker_lost",
        }
    }
}

/// Failures while bundling an owner's files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveError {
    #[error("no media files to archive")]
    Empty,

    #[error("archive content is {actual} bytes, limit is {limit} bytes")]
    TooLarge { actual: u64, limit: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write archive '{}': {message}", .path.display())]
    Compression { path: PathBuf, message: String },
}

impl ArchiveError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::TooLarge { .. } => "too_large",
            Self::Storage(_) => "storage_io",
            Self::Compression { .. } => "compression",
        }
    }
}

/// Failures while picking the file to serve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("file '{filename}' not found")]
    NotFound { filename: String },

    #[error("no files available")]
    NoFilesAvailable,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ResolveError {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoFilesAvailable => "no_files_available",
            Self::Storage(_) => "storage_io",
        }
    }
}

/// Failures of the download history sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("history record {id} does not exist")]
    UnknownRecord { id: u64 },

    #[error("history record {id} already finished as {status}")]
    AlreadyFinished { id: u64, status: String },

    /// Backend unavailable or I/O failure; worth retrying
    #[error("history {operation} failed: {message}")]
    Backend { operation: String, message: String },
}

impl HistoryError {
    #[must_use]
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownRecord { .. } => "unknown_record",
            Self::AlreadyFinished { .. } => "already_finished",
            Self::Backend { .. } => "history_backend",
        }
    }
}

/// A rejected owner key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid owner key '{key}': {reason}")]
pub struct OwnerKeyError {
    pub key: String,
    pub reason: &'static str,
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// What the request boundary shows for a failure: a machine-readable kind plus
/// the human-readable detail, never a backtrace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub detail: String,
}

impl From<&FetchError> for ErrorReport {
    fn from(error: &FetchError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl From<&ArchiveError> for ErrorReport {
    fn from(error: &ArchiveError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl From<&ResolveError> for ErrorReport {
    fn from(error: &ResolveError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl From<&HistoryError> for ErrorReport {
    fn from(error: &HistoryError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl From<&StorageError> for ErrorReport {
    fn from(error: &StorageError) -> Self {
        Self {
            kind: "storage_io",
            detail: error.to_string(),
        }
    }
}

impl From<&OwnerKeyError> for ErrorReport {
    fn from(error: &OwnerKeyError) -> Self {
        Self {
            kind: "invalid_owner",
            detail: error.to_string(),
        }
    }
}

impl From<&ConfigError> for ErrorReport {
    fn from(error: &ConfigError) -> Self {
        Self {
            kind: "config",
            detail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failure_message_includes_exit_code_and_diagnostics() {
        let err = FetchError::tool_failure("yt-dlp", Some(2), "ERROR: unsupported URL");
        assert_eq!(
            err.to_string(),
            "'yt-dlp' failed with exit code 2: ERROR: unsupported URL"
        );
        assert_eq!(err.kind(), "tool_failure");
    }

    #[test]
    fn missing_tool_has_no_exit_code() {
        let err = FetchError::tool_failure("spotdl", None, "");
        assert_eq!(err.to_string(), "'spotdl' failed");
    }

    #[test]
    fn storage_error_remembers_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = StorageError::new("/tmp/x.mp3", "remove", io);
        assert!(err.not_found);
        assert!(err.to_string().contains("/tmp/x.mp3"));
    }

    #[test]
    fn report_serializes_kind_and_detail() {
        let err = ArchiveError::TooLarge {
            actual: 10,
            limit: 5,
        };
        let report = ErrorReport::from(&err);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "too_large");
        assert_eq!(json["detail"], "archive content is 10 bytes, limit is 5 bytes");
    }
}
