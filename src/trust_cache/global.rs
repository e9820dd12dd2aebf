//! Process-wide trust cache.
//!
//! Initialised exactly once: either explicitly with [`install`], or lazily
//! on first lookup from the configured trust cache files. After that the
//! cache is immutable and lookups take no locks.

use super::{TrustCache, TrustCacheError};
use crate::config::{StubConfig, ENV_TRUST_CACHE};
use std::sync::OnceLock;

static TRUST_CACHE: OnceLock<TrustCache> = OnceLock::new();

/// Installs `cache` as the process-wide trust cache.
///
/// # Errors
/// Returns `TrustCacheError::AlreadyLoaded` if a cache was installed or
/// lazily loaded before.
pub fn install(cache: TrustCache) -> Result<(), TrustCacheError> {
    let count = cache.len();
    TRUST_CACHE.set(cache).map_err(|_| {
        log::warn!("Trust cache already loaded, ignoring install");
        TrustCacheError::AlreadyLoaded
    })?;
    log::info!("Installed trust cache with {} entries", count);
    Ok(())
}

/// Returns the process-wide trust cache, loading it from the process
/// configuration if nothing was installed.
pub fn get() -> &'static TrustCache {
    TRUST_CACHE.get_or_init(|| load_configured(crate::config::process_config()))
}

/// Whether the process-wide trust cache has been initialised.
pub fn is_loaded() -> bool {
    TRUST_CACHE.get().is_some()
}

/// Loads and merges every trust cache file named in `config`.
///
/// Unreadable or malformed files are skipped with a warning so that one bad
/// source does not hide the others.
pub fn load_configured(config: &StubConfig) -> TrustCache {
    let mut cache = TrustCache::new();

    if config.trust_cache_paths.is_empty() {
        log::warn!("No trust cache configured (set {}); every lookup will miss", ENV_TRUST_CACHE);
        return cache;
    }

    for path in &config.trust_cache_paths {
        match TrustCache::load(path) {
            Ok(loaded) => {
                log::info!("Loaded {} trust cache entries from {}", loaded.len(), path);
                cache.merge(loaded);
            }
            Err(err) => log::warn!("Skipping trust cache {}: {}", path, err),
        }
    }

    cache
}
