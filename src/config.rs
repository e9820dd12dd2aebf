//! Configuration management for library-stub.
//!
//! Defines the settings shared by the signature evaluator and the trust cache.

use alloc::string::String;
use alloc::vec::Vec;

#[cfg(feature = "std")]
use std::sync::OnceLock;

/// Environment variable holding trust cache paths (platform path-list syntax).
pub const ENV_TRUST_CACHE: &str = "LIBRARY_STUB_TRUST_CACHE";
/// Environment variable naming the preferred slice of fat binaries.
pub const ENV_PREFERRED_CPU: &str = "LIBRARY_STUB_PREFERRED_CPU";
/// Environment variable disabling page hash verification when `0` or `false`.
pub const ENV_VERIFY_PAGES: &str = "LIBRARY_STUB_VERIFY_PAGES";
/// Environment variable overriding the maximum file size in bytes.
pub const ENV_MAX_FILE_SIZE: &str = "LIBRARY_STUB_MAX_FILE_SIZE";

/// Default upper bound on evaluated file size (1 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Main configuration structure for the library.
///
/// Populated by the host application, or from the environment with
/// [`StubConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubConfig {
    /// Trust cache files merged into the process-wide trust cache.
    pub trust_cache_paths: Vec<String>,

    /// CPU type of the slice to evaluate in fat binaries.
    /// If None, or absent from the file, the first slice is used.
    pub preferred_cpu: Option<u32>,

    /// Verify code page and special slot hashes.
    pub verify_pages: bool,

    /// Files larger than this are rejected without being mapped.
    pub max_file_size: u64,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            trust_cache_paths: Vec::new(),
            preferred_cpu: host_cpu_type(),
            verify_pages: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl StubConfig {
    /// Builds a configuration from `LIBRARY_STUB_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    #[cfg(feature = "std")]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    #[cfg(feature = "std")]
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<std::ffi::OsString>,
    {
        let mut config = Self::default();

        if let Some(paths) = lookup(ENV_TRUST_CACHE) {
            config.trust_cache_paths = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
        }

        if let Some(value) = lookup(ENV_PREFERRED_CPU) {
            match crate::macho::parse_cpu_type(&value.to_string_lossy()) {
                Some(cpu) => config.preferred_cpu = Some(cpu),
                None => log::warn!("Ignoring unknown {}={:?}", ENV_PREFERRED_CPU, value),
            }
        }

        if let Some(value) = lookup(ENV_VERIFY_PAGES) {
            let value = value.to_string_lossy();
            config.verify_pages = !matches!(value.trim(), "0" | "false" | "no" | "off");
        }

        if let Some(value) = lookup(ENV_MAX_FILE_SIZE) {
            match value.to_string_lossy().trim().parse() {
                Ok(limit) => config.max_file_size = limit,
                Err(_) => log::warn!("Ignoring invalid {}={:?}", ENV_MAX_FILE_SIZE, value),
            }
        }

        config
    }
}

/// The configuration used by the free functions and the C ABI.
///
/// Read from the environment on first use and fixed for the process lifetime.
#[cfg(feature = "std")]
pub fn process_config() -> &'static StubConfig {
    static CONFIG: OnceLock<StubConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let config = StubConfig::from_env();
        log::debug!("Process configuration: {:?}", config);
        config
    })
}

fn host_cpu_type() -> Option<u32> {
    if cfg!(target_arch = "aarch64") {
        Some(crate::macho::CPU_TYPE_ARM64)
    } else if cfg!(target_arch = "x86_64") {
        Some(crate::macho::CPU_TYPE_X86_64)
    } else {
        None
    }
}
