//! Domain types passed between the route layer and the core.

use crate::constants::{MAX_OWNER_KEY_LEN, RESERVED_OWNER_NAMES, SHARED_OWNER_DIR};
use crate::errors::OwnerKeyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated owner name, safe to use as a single path component.
///
/// Validation rejects rather than rewrites, so two distinct accepted keys can
/// never collapse onto the same directory. Keys are lowercase only, which
/// keeps that true on case-insensitive filesystems.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerKey(String);

impl OwnerKey {
    pub fn parse(raw: &str) -> Result<Self, OwnerKeyError> {
        let reject = |reason| OwnerKeyError {
            key: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(reject("must not be empty"));
        }
        if raw.len() > MAX_OWNER_KEY_LEN {
            return Err(reject("longer than 64 bytes"));
        }
        if raw.starts_with('.') {
            return Err(reject("must not start with '.'"));
        }
        if !raw.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.')
        }) {
            return Err(reject(
                "only lowercase ASCII letters, digits, '-', '_' and '.' are allowed",
            ));
        }
        if RESERVED_OWNER_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(raw))
        {
            return Err(reject("name is reserved"));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerKey {
    type Error = OwnerKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OwnerKey> for String {
    fn from(key: OwnerKey) -> Self {
        key.0
    }
}

/// Storage and cache scope of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Anonymous requests share one namespace
    Shared,
    User(OwnerKey),
}

impl Owner {
    /// Absent key maps to the shared namespace.
    pub fn parse(raw: Option<&str>) -> Result<Self, OwnerKeyError> {
        match raw {
            None => Ok(Self::Shared),
            Some(key) => OwnerKey::parse(key).map(Self::User),
        }
    }

    /// Directory name and cache-key prefix for this owner
    pub fn segment(&self) -> &str {
        match self {
            Self::Shared => SHARED_OWNER_DIR,
            Self::User(key) => key.as_str(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

impl From<OwnerKey> for Owner {
    fn from(key: OwnerKey) -> Self {
        Self::User(key)
    }
}

/// One incoming request to fetch a URL into an owner's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub owner: Owner,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, owner: Owner) -> Self {
        Self {
            url: url.into(),
            owner,
        }
    }
}

/// Identifier handed out by a history sink for each recorded attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        })
    }
}

/// How a recorded attempt finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Success { filename: String },
    Failed { message: String },
}

/// One fetch attempt as kept by the history sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: RecordId,
    pub owner: Owner,
    pub url: String,
    pub filename: Option<String>,
    pub status: DownloadStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn pending(id: RecordId, owner: Owner, url: impl Into<String>) -> Self {
        Self {
            id,
            owner,
            url: url.into(),
            filename: None,
            status: DownloadStatus::Pending,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    /// Apply the single `pending -> success|failed` transition and stamp the
    /// completion time.
    pub fn finish(&mut self, outcome: DownloadOutcome) {
        self.timestamp = Utc::now();
        match outcome {
            DownloadOutcome::Success { filename } => {
                self.status = DownloadStatus::Success;
                self.filename = Some(filename);
            }
            DownloadOutcome::Failed { message } => {
                self.status = DownloadStatus::Failed;
                self.error_message = Some(message);
            }
        }
    }
}

/// Per-owner download counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_usernames() {
        for name in ["alice", "bob_2", "carol-smith", "d.e"] {
            assert!(OwnerKey::parse(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_path_tricks_and_reserved_names() {
        for name in ["", "..", ".hidden", "a/b", "a\\b", "shared", "TEMP", "al ice"] {
            assert!(OwnerKey::parse(name).is_err(), "{name:?} should be rejected");
        }
        assert!(OwnerKey::parse(&"x".repeat(65)).is_err());
    }

    #[test]
    fn rejects_uppercase_so_keys_never_differ_only_by_case() {
        for name in ["Alice", "ALICE", "aLice"] {
            assert!(OwnerKey::parse(name).is_err(), "{name:?} should be rejected");
        }
        assert!(OwnerKey::parse("alice").is_ok());
    }

    #[test]
    fn absent_owner_is_shared() {
        let owner = Owner::parse(None).unwrap();
        assert!(owner.is_shared());
        assert_eq!(owner.segment(), "shared");
        assert_eq!(Owner::parse(Some("alice")).unwrap().segment(), "alice");
    }

    #[test]
    fn owner_round_trips_through_json() {
        let owner = Owner::parse(Some("alice")).unwrap();
        let json = serde_json::to_string(&owner).unwrap();
        assert_eq!(serde_json::from_str::<Owner>(&json).unwrap(), owner);

        let bad = r#"{"user":"../etc"}"#;
        assert!(serde_json::from_str::<Owner>(bad).is_err());
    }

    #[test]
    fn finish_sets_filename_or_message() {
        let owner = Owner::Shared;
        let mut record = HistoryRecord::pending(RecordId(1), owner, "https://youtu.be/x");
        record.finish(DownloadOutcome::Failed {
            message: "timed out".into(),
        });
        assert_eq!(record.status, DownloadStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("timed out"));
        assert!(record.filename.is_none());
    }
}
