//! Embedded Code Signature Evaluation.
//!
//! An embedded signature is a SuperBlob referenced by `LC_CODE_SIGNATURE`:
//!
//! ```text
//! SuperBlob (0xfade0cc0)
//! ├── CodeDirectory            (slot 0x0000)
//! ├── Requirements             (slot 0x0002)
//! ├── Entitlements XML         (slot 0x0005)
//! ├── Entitlements DER         (slot 0x0007)
//! ├── Alternate CodeDirectory  (slot 0x1000..)
//! └── CMS signature wrapper    (slot 0x10000)
//! ```
//!
//! # Components
//! - `blob`: SuperBlob and generic blob decoding.
//! - `code_directory`: CodeDirectory decoding and hash slot access.
//! - `evaluator`: slice selection, structural verification, CDHash extraction.
//!
//! # Guarantees
//! - **No hash on failure**: a [`CdHash`] is only ever returned inside a successful
//!   [`Evaluation`]; failures carry a [`SignatureError`] and nothing else.
//! - **Bounds**: every offset taken from the file is validated before use.
//! - **Read-only**: files are mapped read-only and never modified.

pub mod blob;
pub mod code_directory;
pub mod evaluator;

pub use blob::{Blob, SuperBlob};
pub use code_directory::CodeDirectory;
pub use evaluator::{Evaluation, SignatureEvaluator};

#[cfg(feature = "std")]
pub use evaluator::evaluate_signature;

use crate::macho::MachoError;
use alloc::string::String;
use core::fmt;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

/// Single Requirement blob.
pub const CSMAGIC_REQUIREMENT: u32 = 0xfade_0c00;
/// Requirements vector (internal requirements).
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade_0c01;
/// CodeDirectory blob.
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade_0c02;
/// Embedded form of signature data.
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade_0cc0;
/// XML entitlements blob.
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade_7171;
/// DER entitlements blob.
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade_7172;
/// Wrapper around the CMS signature.
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade_0b01;

pub const CSSLOT_CODEDIRECTORY: u32 = 0;
pub const CSSLOT_INFOSLOT: u32 = 1;
pub const CSSLOT_REQUIREMENTS: u32 = 2;
pub const CSSLOT_RESOURCEDIR: u32 = 3;
pub const CSSLOT_APPLICATION: u32 = 4;
pub const CSSLOT_ENTITLEMENTS: u32 = 5;
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 7;
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;
pub const CSSLOT_ALTERNATE_CODEDIRECTORY_MAX: u32 = 5;
pub const CSSLOT_CMS_SIGNATURE: u32 = 0x10000;

/// CodeDirectory flag: ad-hoc signed.
pub const CS_ADHOC: u32 = 0x0000_0002;

/// Length of a CDHash as used by trust caches and the kernel.
pub const CDHASH_LEN: usize = 20;

const MAX_DIGEST_LEN: usize = 48;

/// Digest algorithm of a CodeDirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HashType {
    Sha1 = 1,
    Sha256 = 2,
    Sha256Truncated = 3,
    Sha384 = 4,
}

impl HashType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(HashType::Sha1),
            2 => Some(HashType::Sha256),
            3 => Some(HashType::Sha256Truncated),
            4 => Some(HashType::Sha384),
            _ => None,
        }
    }

    /// Size of one stored slot hash.
    pub fn digest_len(self) -> usize {
        match self {
            HashType::Sha1 | HashType::Sha256Truncated => 20,
            HashType::Sha256 => 32,
            HashType::Sha384 => 48,
        }
    }

    /// Preference when several CodeDirectories are present; higher wins.
    pub fn strength(self) -> u8 {
        match self {
            HashType::Sha1 => 1,
            HashType::Sha256Truncated => 2,
            HashType::Sha256 => 3,
            HashType::Sha384 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HashType::Sha1 => "sha1",
            HashType::Sha256 => "sha256",
            HashType::Sha256Truncated => "sha256-truncated",
            HashType::Sha384 => "sha384",
        }
    }

    fn compute(self, data: &[u8], out: &mut [u8; MAX_DIGEST_LEN]) -> usize {
        match self {
            HashType::Sha1 => {
                out[..20].copy_from_slice(&Sha1::digest(data));
                20
            }
            HashType::Sha256 | HashType::Sha256Truncated => {
                out[..32].copy_from_slice(&Sha256::digest(data));
                32
            }
            HashType::Sha384 => {
                out[..48].copy_from_slice(&Sha384::digest(data));
                48
            }
        }
    }

    /// Checks `expected` against the digest of `data`, truncated to `expected.len()`.
    pub fn matches(self, data: &[u8], expected: &[u8]) -> bool {
        let mut digest = [0u8; MAX_DIGEST_LEN];
        let len = self.compute(data, &mut digest);
        expected.len() <= len && digest[..expected.len()] == *expected
    }

    /// CDHash of a CodeDirectory blob: its digest truncated to [`CDHASH_LEN`].
    pub fn cdhash(self, code_directory: &[u8]) -> CdHash {
        let mut digest = [0u8; MAX_DIGEST_LEN];
        self.compute(code_directory, &mut digest);
        let mut bytes = [0u8; CDHASH_LEN];
        bytes.copy_from_slice(&digest[..CDHASH_LEN]);
        CdHash(bytes)
    }
}

/// Content hash of a signed image: the truncated digest of its CodeDirectory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CdHash([u8; CDHASH_LEN]);

impl CdHash {
    pub const fn new(bytes: [u8; CDHASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a CDHash from exactly [`CDHASH_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; CDHASH_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parses 40 hex characters.
    pub fn from_hex(text: &str) -> Option<Self> {
        let mut bytes = [0u8; CDHASH_LEN];
        hex::decode_to_slice(text.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; CDHASH_LEN] {
        &self.0
    }

    /// No legitimate CDHash is all zero bytes.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for CdHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CdHash({})", self)
    }
}

impl fmt::Display for CdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Integer result of a signature evaluation, as returned over the C ABI.
///
/// Zero is success; every failure class is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SignatureStatus {
    Success = 0,
    FileNotFound = -1,
    Unreadable = -2,
    NotMachO = -3,
    NoSignature = -4,
    MalformedSignature = -5,
    UnsupportedHashType = -6,
    HashMismatch = -7,
    InvalidArgument = -8,
    FileTooLarge = -9,
    Internal = -10,
    MalformedBinary = -11,
}

impl SignatureStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == SignatureStatus::Success
    }
}

/// Errors from evaluating a code signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    /// File does not exist.
    FileNotFound,
    /// File exists but could not be read or mapped.
    Unreadable,
    /// File is not a Mach-O image.
    NotMachO,
    /// Mach-O structures (header, load commands, fat table) are inconsistent.
    MalformedBinary,
    /// No `LC_CODE_SIGNATURE` load command.
    NoSignature,
    /// Signature blobs are truncated, overlapping or carry a wrong magic.
    MalformedSignature,
    /// CodeDirectory uses a digest this library does not implement.
    UnsupportedHashType,
    /// A page or special slot hash does not match the signed content.
    HashMismatch,
    /// Caller passed an invalid argument (null or non-UTF-8 path).
    InvalidArgument,
    /// File exceeds the configured size limit.
    FileTooLarge,
    /// Unexpected failure inside the library.
    Internal,
}

impl SignatureError {
    pub fn status(self) -> SignatureStatus {
        match self {
            SignatureError::FileNotFound => SignatureStatus::FileNotFound,
            SignatureError::Unreadable => SignatureStatus::Unreadable,
            SignatureError::NotMachO => SignatureStatus::NotMachO,
            SignatureError::MalformedBinary => SignatureStatus::MalformedBinary,
            SignatureError::NoSignature => SignatureStatus::NoSignature,
            SignatureError::MalformedSignature => SignatureStatus::MalformedSignature,
            SignatureError::UnsupportedHashType => SignatureStatus::UnsupportedHashType,
            SignatureError::HashMismatch => SignatureStatus::HashMismatch,
            SignatureError::InvalidArgument => SignatureStatus::InvalidArgument,
            SignatureError::FileTooLarge => SignatureStatus::FileTooLarge,
            SignatureError::Internal => SignatureStatus::Internal,
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::FileNotFound => write!(f, "File not found"),
            SignatureError::Unreadable => write!(f, "File could not be read"),
            SignatureError::NotMachO => write!(f, "Not a Mach-O file"),
            SignatureError::MalformedBinary => write!(f, "Malformed Mach-O structure"),
            SignatureError::NoSignature => write!(f, "No embedded code signature"),
            SignatureError::MalformedSignature => write!(f, "Malformed code signature"),
            SignatureError::UnsupportedHashType => write!(f, "Unsupported CodeDirectory hash type"),
            SignatureError::HashMismatch => write!(f, "Code signature hash mismatch"),
            SignatureError::InvalidArgument => write!(f, "Invalid argument"),
            SignatureError::FileTooLarge => write!(f, "File too large"),
            SignatureError::Internal => write!(f, "Internal error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SignatureError {}

impl From<MachoError> for SignatureError {
    fn from(err: MachoError) -> Self {
        match err {
            MachoError::NotMachO => SignatureError::NotMachO,
            _ => SignatureError::MalformedBinary,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for SignatureError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SignatureError::FileNotFound,
            _ => SignatureError::Unreadable,
        }
    }
}
