#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(not(feature = "std"))]
use core::panic::PanicInfo;

#[cfg(not(feature = "std"))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! { loop {} }

pub mod bytes;
pub mod macho;
pub mod codesign;
pub mod trust_cache;
pub mod policy;
pub mod config;
#[cfg(feature = "std")]
pub mod ffi;

#[cfg(test)]
mod test_fixtures;

pub use codesign::{CdHash, Evaluation, HashType, SignatureError, SignatureEvaluator, SignatureStatus};
pub use config::StubConfig;
pub use policy::{assess, TrustAssessment};
pub use trust_cache::{TrustCache, TrustCacheEntry, TrustCacheError};

#[cfg(feature = "std")]
pub use codesign::evaluate_signature;
#[cfg(feature = "std")]
pub use trust_cache::is_cdhash_in_trust_cache;

const VERSION_TEXT: &str = concat!(
    "@(#)PROGRAM:library_stub  PROJECT:library_stub-",
    env!("CARGO_PKG_VERSION"),
    "\n\0"
);

const fn version_bytes<const N: usize>(text: &str) -> [u8; N] {
    let src = text.as_bytes();
    let mut out = [0u8; N];
    let mut i = 0;
    while i < N {
        out[i] = src[i];
        i += 1;
    }
    out
}

#[allow(non_upper_case_globals)]
#[no_mangle]
pub static library_stubVersionNumber: f64 = 1.0;

#[allow(non_upper_case_globals)]
#[no_mangle]
pub static library_stubVersionString: [u8; VERSION_TEXT.len()] = version_bytes(VERSION_TEXT);

#[no_mangle]
pub extern "C" fn library_stub_version() -> u32 {
    0x010000
}
