//! Trust cache encodings.
//!
//! Binary payload (little-endian):
//!
//! ```text
//! u32 version | u8[16] uuid | u32 num_entries | entries...
//!   v0: cdhash[20]
//!   v1: cdhash[20] hash_type flags
//!   v2: cdhash[20] hash_type flags constraint_category reserved
//! ```
//!
//! Text: one hex CDHash per line; `#` starts a comment, anything after
//! the first token is ignored.
//!
//! JSON (`json` feature): `["<hex>", ...]` or `{"entries": ["<hex>", ...]}`.

use super::{TrustCache, TrustCacheEntry, TrustCacheError};
use crate::bytes::{slice_at, Endian};
use crate::codesign::{CdHash, CDHASH_LEN};
use alloc::vec::Vec;

pub const HEADER_LEN: usize = 24;
pub const MAX_VERSION: u32 = 2;

fn entry_len(version: u32) -> usize {
    match version {
        0 => CDHASH_LEN,
        1 => CDHASH_LEN + 2,
        _ => CDHASH_LEN + 4,
    }
}

/// Detects the encoding and decodes it.
///
/// A binary payload starts with a version word below 3, which is never
/// valid text; anything else is text (or JSON when enabled).
pub fn parse(data: &[u8]) -> Result<TrustCache, TrustCacheError> {
    if let Some(version) = Endian::Little.read_u32(data, 0) {
        if version <= MAX_VERSION {
            return parse_binary(data);
        }
    }

    #[cfg(feature = "json")]
    {
        let first = data.iter().find(|b| !b.is_ascii_whitespace());
        if matches!(first, Some(b'[') | Some(b'{')) {
            return parse_json(data);
        }
    }

    parse_text(data)
}

/// Decodes a binary trust cache payload.
pub fn parse_binary(data: &[u8]) -> Result<TrustCache, TrustCacheError> {
    let le = Endian::Little;
    let version = le.read_u32(data, 0).ok_or(TrustCacheError::Truncated)?;
    if version > MAX_VERSION {
        return Err(TrustCacheError::UnsupportedVersion(version));
    }
    let uuid = slice_at(data, 4, 16).ok_or(TrustCacheError::Truncated)?;
    let count = le.read_u32(data, 20).ok_or(TrustCacheError::Truncated)? as usize;

    let size = entry_len(version);
    let needed = count
        .checked_mul(size)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or(TrustCacheError::Truncated)?;
    if data.len() < needed {
        log::debug!("Trust cache declares {} entries but holds {} bytes", count, data.len());
        return Err(TrustCacheError::Truncated);
    }
    if data.len() > needed {
        log::debug!("Ignoring {} trailing trust cache bytes", data.len() - needed);
    }

    let entries = data[HEADER_LEN..needed].chunks_exact(size).map(|raw| {
        let mut entry = TrustCacheEntry::new(CdHash::from_slice(&raw[..CDHASH_LEN]).unwrap_or_default());
        if version >= 1 {
            entry.hash_type = raw[CDHASH_LEN];
            entry.flags = raw[CDHASH_LEN + 1];
        }
        if version >= 2 {
            entry.constraint_category = raw[CDHASH_LEN + 2];
        }
        entry
    });
    let cache = TrustCache::from_entries(entries);

    log::debug!(
        "Decoded v{} trust cache {} with {} entries",
        version,
        hex::encode(uuid),
        cache.len()
    );
    Ok(cache)
}

/// Decodes a hex-per-line text trust cache.
pub fn parse_text(data: &[u8]) -> Result<TrustCache, TrustCacheError> {
    let text = core::str::from_utf8(data).map_err(|_| TrustCacheError::InvalidEncoding)?;
    let mut entries = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or("");
        let token = match content.split_whitespace().next() {
            Some(token) => token,
            None => continue,
        };
        let cdhash = CdHash::from_hex(token).ok_or(TrustCacheError::InvalidEntry { line: index + 1 })?;
        entries.push(TrustCacheEntry::new(cdhash));
    }

    Ok(TrustCache::from_entries(entries))
}

#[cfg(feature = "json")]
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum JsonManifest {
    List(Vec<alloc::string::String>),
    Object { entries: Vec<alloc::string::String> },
}

/// Decodes a JSON trust cache manifest.
#[cfg(feature = "json")]
pub fn parse_json(data: &[u8]) -> Result<TrustCache, TrustCacheError> {
    let manifest: JsonManifest = serde_json::from_slice(data).map_err(|_| TrustCacheError::InvalidJson)?;
    let hashes = match manifest {
        JsonManifest::List(hashes) => hashes,
        JsonManifest::Object { entries } => entries,
    };

    let mut entries = Vec::with_capacity(hashes.len());
    for (index, text) in hashes.iter().enumerate() {
        let cdhash = CdHash::from_hex(text).ok_or(TrustCacheError::InvalidEntry { line: index + 1 })?;
        entries.push(TrustCacheEntry::new(cdhash));
    }
    Ok(TrustCache::from_entries(entries))
}
