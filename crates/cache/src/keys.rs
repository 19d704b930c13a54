//! Cache key derivation
//!
//! A key is `<owner>_<digest>` where the digest is XXH3-128 over the trimmed
//! URL and the owner segment. The rendered key doubles as the cache file
//! stem, so the index can be rebuilt from the directory listing.

use audiograb_core::{Owner, OwnerKey, SHARED_OWNER_DIR};
use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

const DIGEST_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    owner: Owner,
    digest: String,
}

impl CacheKey {
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Parse a cache file stem back into a key.
    ///
    /// Returns `None` for anything that `compute_key` could not have
    /// produced.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (segment, digest) = stem.rsplit_once('_')?;
        if digest.len() != DIGEST_HEX_LEN
            || !digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        let owner = if segment == SHARED_OWNER_DIR {
            Owner::Shared
        } else {
            Owner::User(OwnerKey::parse(segment).ok()?)
        };
        Some(Self {
            owner,
            digest: digest.to_string(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.owner.segment(), self.digest)
    }
}

/// Derive the cache key for `url` fetched on behalf of `owner`.
///
/// Only surrounding whitespace is stripped from the URL. Query strings,
/// fragments and case are significant.
pub fn compute_key(url: &str, owner: &Owner) -> CacheKey {
    let mut input = Vec::with_capacity(url.len() + owner.segment().len() + 1);
    input.extend_from_slice(url.trim().as_bytes());
    // Separator keeps ("ab", "c") and ("a", "bc") apart
    input.push(0);
    input.extend_from_slice(owner.segment().as_bytes());

    CacheKey {
        owner: owner.clone(),
        digest: format!("{:032x}", xxh3_128(&input)),
    }
}
