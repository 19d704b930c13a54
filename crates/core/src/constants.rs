/// Constants used throughout the audiograb codebase
// Directory layout under the root directory
pub const DOWNLOADS_DIR: &str = "downloads";
pub const CACHE_DIR: &str = "cache";
pub const TEMP_DIR: &str = "temp";
pub const SHARED_OWNER_DIR: &str = "shared";
pub const STAGING_DIR: &str = ".staging";
pub const HISTORY_FILE: &str = "history.json";

// Owner directory names that can never be claimed by a user
pub const RESERVED_OWNER_NAMES: &[&str] = &[SHARED_OWNER_DIR, TEMP_DIR];
pub const MAX_OWNER_KEY_LEN: usize = 64;

// Media files recognised in owner storage
pub const MEDIA_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav"];
pub const CACHE_EXTENSION: &str = "mp3";
pub const ARCHIVE_EXTENSION: &str = "zip";

// Defaults
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_ARCHIVE_SIZE_CAP_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const DEFAULT_HISTORY_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_HISTORY_RETRY_DELAY_MS: u64 = 200;

// Captured tool output kept for diagnostics
pub const MAX_DIAGNOSTIC_BYTES: usize = 4096;

// Environment variable names
pub const CONFIG_PATH_VAR: &str = "AUDIOGRAB_CONFIG";
pub const ROOT_VAR: &str = "AUDIOGRAB_ROOT";
pub const WORKER_POOL_SIZE_VAR: &str = "AUDIOGRAB_WORKER_POOL_SIZE";
pub const CACHE_TTL_VAR: &str = "AUDIOGRAB_CACHE_TTL_SECONDS";
pub const ARCHIVE_CAP_VAR: &str = "AUDIOGRAB_ARCHIVE_SIZE_CAP_BYTES";
pub const FETCH_TIMEOUT_VAR: &str = "AUDIOGRAB_FETCH_TIMEOUT_SECONDS";
pub const SWEEP_INTERVAL_VAR: &str = "AUDIOGRAB_SWEEP_INTERVAL_SECONDS";
