//! Core domain types, errors, configuration and constants for `audiograb`.
//!
//! ## Key Components
//!
//! - **`errors`**: one error enum per failure surface (`FetchError`,
//!   `ArchiveError`, `ResolveError`, `HistoryError`, `ConfigError`) plus the
//!   cloneable `StorageError` they share for filesystem failures.
//! - **`types`**: validated owner keys, fetch requests and history records.
//! - **`config`**: `CoreConfig` and its layered loader.
//! - **`constants`**: directory names, recognised extensions and defaults.

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    config::{ConfigLoader, CoreConfig, ToolConfig},
    constants::*,
    errors::{
        ArchiveError, ConfigError, ErrorReport, FetchError, HistoryError, OwnerKeyError,
        ResolveError, StorageError,
    },
    types::*,
};
