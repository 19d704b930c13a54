//! Content-addressed media cache for audiograb.
//!
//! Fetched files are copied into a single cache directory under a key
//! derived from the request URL and owner. Entries expire after a TTL and
//! are removed by the [`EvictionSweeper`].

pub mod keys;
pub mod store;
pub mod sweeper;

pub use keys::{compute_key, CacheKey};
pub use store::{CacheEntry, CacheStore, EvictionStats};
pub use sweeper::{EvictionSweeper, SweepReport, SweeperHandle};
