//! Trust Cache.
//!
//! A trust cache is a set of CDHashes considered trusted regardless of who
//! signed the code. This module holds the in-memory set and its lookup;
//! `format` decodes the on-disk representations and `global` owns the
//! process-wide instance.
//!
//! # Guarantees
//! - **Sorted**: entries are kept sorted and de-duplicated; lookup is a binary search.
//! - **No zero hash**: all-zero entries are dropped on construction and the
//!   all-zero hash is never reported as trusted.
//! - **Immutable snapshot**: lookups are pure for a given `TrustCache` value.

pub mod format;
#[cfg(feature = "std")]
pub mod global;

use crate::codesign::CdHash;
use alloc::vec::Vec;
use core::fmt;

#[cfg(feature = "std")]
use std::path::Path;

/// Errors related to trust cache loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustCacheError {
    /// Binary payload shorter than its header declares.
    Truncated,
    /// Binary payload with an unknown format version.
    UnsupportedVersion(u32),
    /// Text entry that is not a 40-character hex CDHash (1-based line).
    InvalidEntry { line: usize },
    /// Text payload is not UTF-8.
    InvalidEncoding,
    /// JSON manifest could not be decoded.
    InvalidJson,
    /// Trust cache file not found.
    NotFound,
    /// IO error (generic).
    IoError,
    /// The process-wide trust cache was already initialised.
    AlreadyLoaded,
}

impl fmt::Display for TrustCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustCacheError::Truncated => write!(f, "Trust cache truncated"),
            TrustCacheError::UnsupportedVersion(v) => write!(f, "Unsupported trust cache version {}", v),
            TrustCacheError::InvalidEntry { line } => write!(f, "Invalid trust cache entry on line {}", line),
            TrustCacheError::InvalidEncoding => write!(f, "Trust cache is not valid UTF-8"),
            TrustCacheError::InvalidJson => write!(f, "Invalid trust cache JSON manifest"),
            TrustCacheError::NotFound => write!(f, "Trust cache file not found"),
            TrustCacheError::IoError => write!(f, "Trust cache I/O error"),
            TrustCacheError::AlreadyLoaded => write!(f, "Trust cache already loaded"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrustCacheError {}

#[cfg(feature = "std")]
impl From<std::io::Error> for TrustCacheError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => TrustCacheError::NotFound,
            _ => TrustCacheError::IoError,
        }
    }
}

/// One trusted CDHash with the metadata carried by binary trust caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustCacheEntry {
    pub cdhash: CdHash,
    /// CodeDirectory hash type, 0 when the source format does not record it.
    pub hash_type: u8,
    pub flags: u8,
    /// Launch constraint category (version 2 payloads).
    pub constraint_category: u8,
}

impl TrustCacheEntry {
    pub fn new(cdhash: CdHash) -> Self {
        Self {
            cdhash,
            hash_type: 0,
            flags: 0,
            constraint_category: 0,
        }
    }
}

/// An immutable, sorted set of trusted CDHashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustCache {
    entries: Vec<TrustCacheEntry>,
}

impl TrustCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I: IntoIterator<Item = TrustCacheEntry>>(entries: I) -> Self {
        let mut cache = Self {
            entries: entries.into_iter().collect(),
        };
        cache.normalize();
        cache
    }

    pub fn from_hashes<I: IntoIterator<Item = CdHash>>(hashes: I) -> Self {
        Self::from_entries(hashes.into_iter().map(TrustCacheEntry::new))
    }

    /// Decodes a binary, text or (with `json`) JSON trust cache.
    pub fn parse(data: &[u8]) -> Result<Self, TrustCacheError> {
        format::parse(data)
    }

    /// Reads and decodes a trust cache file.
    #[cfg(feature = "std")]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrustCacheError> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustCacheEntry> {
        self.entries.iter()
    }

    pub fn lookup(&self, cdhash: &CdHash) -> Option<&TrustCacheEntry> {
        if cdhash.is_zero() {
            return None;
        }
        self.entries
            .binary_search_by(|entry| entry.cdhash.cmp(cdhash))
            .ok()
            .map(|index| &self.entries[index])
    }

    pub fn contains(&self, cdhash: &CdHash) -> bool {
        self.lookup(cdhash).is_some()
    }

    /// Membership test for a raw hash; anything but exactly 20 bytes is absent.
    pub fn contains_bytes(&self, bytes: &[u8]) -> bool {
        match CdHash::from_slice(bytes) {
            Some(cdhash) => self.contains(&cdhash),
            None => {
                log::debug!("Trust cache lookup with {}-byte hash", bytes.len());
                false
            }
        }
    }

    /// Adds all entries of `other`; on duplicates the existing entry is kept.
    pub fn merge(&mut self, other: TrustCache) {
        self.entries.extend(other.entries);
        self.normalize();
    }

    fn normalize(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.cdhash.is_zero());
        if self.entries.len() != before {
            log::warn!("Dropped {} all-zero trust cache entries", before - self.entries.len());
        }
        // stable sort keeps the earlier of two duplicates first
        self.entries.sort_by(|a, b| a.cdhash.cmp(&b.cdhash));
        self.entries.dedup_by(|later, earlier| later.cdhash == earlier.cdhash);
    }
}

/// Checks `cdhash` against the process-wide trust cache.
#[cfg(feature = "std")]
pub fn is_cdhash_in_trust_cache(cdhash: &[u8]) -> bool {
    global::get().contains_bytes(cdhash)
}
