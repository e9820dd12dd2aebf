//! C ABI.
//!
//! ```c
//! int  evaluateSignature(const char *path, uint8_t *cdhash_out, bool *is_adhoc_out);
//! bool isCdHashInTrustCache(const uint8_t *cdhash, size_t len);
//! ```
//!
//! `evaluateSignature` returns a [`SignatureStatus`] code. Out-parameters are
//! written only on success; either may be null to skip it. `cdhash_out` must
//! point to at least [`CDHASH_LEN`] writable bytes.

#![allow(non_snake_case)]

use crate::codesign::{evaluate_signature, SignatureError, SignatureStatus, CDHASH_LEN};
use crate::trust_cache;
use core::ffi::{c_char, c_int};
use std::ffi::CStr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// Evaluates the embedded code signature of the file at `path`.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string. `cdhash_out` must be
/// null or valid for writes of `CDHASH_LEN` bytes. `is_adhoc_out` must be null
/// or valid for a write of one `bool`.
#[no_mangle]
pub unsafe extern "C" fn evaluateSignature(
    path: *const c_char,
    cdhash_out: *mut u8,
    is_adhoc_out: *mut bool,
) -> c_int {
    if path.is_null() {
        return SignatureStatus::InvalidArgument.code();
    }
    let path = match path_from_c(CStr::from_ptr(path)) {
        Some(path) => path,
        None => return SignatureStatus::InvalidArgument.code(),
    };

    let result = catch_unwind(AssertUnwindSafe(|| evaluate_signature(&path)))
        .unwrap_or_else(|_| {
            log::error!("Panic while evaluating {}", path.display());
            Err(SignatureError::Internal)
        });

    match result {
        Ok(evaluation) => {
            if !cdhash_out.is_null() {
                core::ptr::copy_nonoverlapping(evaluation.cdhash.as_bytes().as_ptr(), cdhash_out, CDHASH_LEN);
            }
            if !is_adhoc_out.is_null() {
                *is_adhoc_out = evaluation.is_adhoc;
            }
            SignatureStatus::Success.code()
        }
        Err(err) => err.status().code(),
    }
}

/// Returns whether the `len`-byte hash at `cdhash` is in the process-wide trust cache.
///
/// # Safety
/// `cdhash` must be null or valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn isCdHashInTrustCache(cdhash: *const u8, len: usize) -> bool {
    if cdhash.is_null() || len == 0 {
        return false;
    }
    let bytes = core::slice::from_raw_parts(cdhash, len);
    catch_unwind(|| trust_cache::is_cdhash_in_trust_cache(bytes)).unwrap_or(false)
}

#[cfg(unix)]
fn path_from_c(path: &CStr) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.to_bytes();
    if bytes.is_empty() {
        return None;
    }
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_c(path: &CStr) -> Option<PathBuf> {
    match path.to_str() {
        Ok("") | Err(_) => None,
        Ok(path) => Some(PathBuf::from(path)),
    }
}
