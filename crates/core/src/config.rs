//! Core configuration with precedence and validation
//!
//! Values are resolved in order: built-in defaults, then the JSON config file,
//! then `AUDIOGRAB_*` environment variables. Command line flags are applied by
//! the binary on top of the result.

use crate::constants::*;
use crate::errors::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the core consumes at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Root directory holding `downloads/` and `cache/`
    pub root_dir: PathBuf,
    /// Number of fetches allowed to run at once
    pub worker_pool_size: usize,
    /// Age after which cache entries and stray archives are removed
    pub cache_ttl: Duration,
    /// Upper bound on the uncompressed size of an archive
    pub archive_size_cap_bytes: u64,
    /// Wall-clock budget for one external fetch
    pub fetch_timeout: Duration,
    /// How often the eviction sweeper runs; zero disables it
    pub sweep_interval: Duration,
    pub history_retry_attempts: u32,
    pub history_retry_delay: Duration,
    pub tools: ToolConfig,
}

/// External programs used to fetch media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub spotdl_bin: String,
    pub ytdlp_bin: String,
    pub ffmpeg_location: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            spotdl_bin: "spotdl".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_location: None,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            archive_size_cap_bytes: DEFAULT_ARCHIVE_SIZE_CAP_BYTES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            history_retry_attempts: DEFAULT_HISTORY_RETRY_ATTEMPTS,
            history_retry_delay: Duration::from_millis(DEFAULT_HISTORY_RETRY_DELAY_MS),
            tools: ToolConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Defaults rooted at `root_dir`, handy for tests and embedding
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root_dir.join(DOWNLOADS_DIR)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root_dir.join(CACHE_DIR)
    }

    pub fn history_file(&self) -> PathBuf {
        self.root_dir.join(HISTORY_FILE)
    }

    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::invalid(
                "worker_pool_size",
                0,
                "at least one worker is required",
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "fetch_timeout_seconds",
                0,
                "timeout must be positive",
            ));
        }
        if self.archive_size_cap_bytes == 0 {
            return Err(ConfigError::invalid(
                "archive_size_cap_bytes",
                0,
                "cap must be positive",
            ));
        }
        if self.history_retry_attempts == 0 {
            return Err(ConfigError::invalid(
                "history_retry_attempts",
                0,
                "at least one attempt is required",
            ));
        }
        Ok(())
    }
}

fn default_root_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audiograb")
}

/// Shape of the JSON config file; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    root_dir: Option<PathBuf>,
    worker_pool_size: Option<usize>,
    cache_ttl_seconds: Option<u64>,
    archive_size_cap_bytes: Option<u64>,
    fetch_timeout_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    history_retry_attempts: Option<u32>,
    history_retry_delay_ms: Option<u64>,
    tools: Option<FileToolConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileToolConfig {
    spotdl_bin: Option<String>,
    ytdlp_bin: Option<String>,
    ffmpeg_location: Option<PathBuf>,
}

/// Configuration loader that handles precedence
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<CoreConfig, ConfigError> {
        let path = Self::config_file_path();
        let mut config = Self::load_from_file(path.as_deref())?;
        Self::apply_env(&mut config, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the given file, if it exists
    pub fn load_from_file(path: Option<&Path>) -> Result<CoreConfig, ConfigError> {
        let mut config = CoreConfig::default();
        let Some(path) = path else {
            return Ok(config);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: FileConfig = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::merge_file(&mut config, file);
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override values from environment variables read through `lookup`
    pub fn apply_env<F>(config: &mut CoreConfig, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ROOT_VAR) {
            config.root_dir = PathBuf::from(root);
        }
        if let Some(size) = parse_var::<usize>(&lookup, WORKER_POOL_SIZE_VAR)? {
            config.worker_pool_size = size;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, CACHE_TTL_VAR)? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse_var::<u64>(&lookup, ARCHIVE_CAP_VAR)? {
            config.archive_size_cap_bytes = bytes;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, FETCH_TIMEOUT_VAR)? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, SWEEP_INTERVAL_VAR)? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// `$AUDIOGRAB_CONFIG`, else `<config dir>/audiograb/config.json`
    pub fn config_file_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|dir| dir.join("audiograb").join("config.json"))
    }

    fn merge_file(config: &mut CoreConfig, file: FileConfig) {
        if let Some(root) = file.root_dir {
            config.root_dir = root;
        }
        if let Some(size) = file.worker_pool_size {
            config.worker_pool_size = size;
        }
        if let Some(secs) = file.cache_ttl_seconds {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(bytes) = file.archive_size_cap_bytes {
            config.archive_size_cap_bytes = bytes;
        }
        if let Some(secs) = file.fetch_timeout_seconds {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.sweep_interval_seconds {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.history_retry_attempts {
            config.history_retry_attempts = attempts;
        }
        if let Some(ms) = file.history_retry_delay_ms {
            config.history_retry_delay = Duration::from_millis(ms);
        }
        if let Some(tools) = file.tools {
            if let Some(bin) = tools.spotdl_bin {
                config.tools.spotdl_bin = bin;
            }
            if let Some(bin) = tools.ytdlp_bin {
                config.tools.ytdlp_bin = bin;
            }
            if tools.ffmpeg_location.is_some() {
                config.tools.ffmpeg_location = tools.ffmpeg_location;
            }
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(name, &raw, e.to_string())),
    }
}
