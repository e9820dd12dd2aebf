//! CodeDirectory decoding.
//!
//! Layout (big-endian), fields appear by version:
//!
//! ```text
//!  0 magic          4 length        8 version      12 flags
//! 16 hashOffset    20 identOffset  24 nSpecialSlots 28 nCodeSlots
//! 32 codeLimit     36 hashSize u8  37 hashType u8  38 platform u8
//! 39 pageSize u8   40 spare2
//! 44 scatterOffset                         (>= 0x20100)
//! 48 teamOffset                            (>= 0x20200)
//! 52 spare3        56 codeLimit64 u64      (>= 0x20300)
//! 64 execSegBase   72 execSegLimit  80 execSegFlags (>= 0x20400)
//! ```
//!
//! Code slot `i` lives at `hashOffset + i * hashSize`; special slot `n`
//! (1-based, counted backwards) at `hashOffset - n * hashSize`.

use super::{CdHash, HashType, SignatureError, CSMAGIC_CODEDIRECTORY, CS_ADHOC};
use crate::bytes::{c_str_at, slice_at, Endian};

pub const CS_SUPPORTSSCATTER: u32 = 0x20100;
pub const CS_SUPPORTSTEAMID: u32 = 0x20200;
pub const CS_SUPPORTSCODELIMIT64: u32 = 0x20300;
pub const CS_SUPPORTSEXECSEG: u32 = 0x20400;

const EARLIEST_VERSION: u32 = 0x20001;

pub(crate) fn fixed_header_len(version: u32) -> usize {
    match version {
        v if v >= CS_SUPPORTSEXECSEG => 88,
        v if v >= CS_SUPPORTSCODELIMIT64 => 64,
        v if v >= CS_SUPPORTSTEAMID => 52,
        v if v >= CS_SUPPORTSSCATTER => 48,
        _ => 44,
    }
}

/// Executable segment description (version 0x20400 and later).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecSegment {
    pub base: u64,
    pub limit: u64,
    pub flags: u64,
}

/// A decoded CodeDirectory borrowing from the signature bytes.
#[derive(Debug, Clone, Copy)]
pub struct CodeDirectory<'a> {
    bytes: &'a [u8],
    pub version: u32,
    pub flags: u32,
    pub hash_type: HashType,
    pub hash_size: usize,
    pub platform: u8,
    pub page_size_log2: u8,
    pub n_special_slots: u32,
    pub n_code_slots: u32,
    pub code_limit: u64,
    pub identifier: &'a str,
    pub team_id: Option<&'a str>,
    pub exec_segment: Option<ExecSegment>,
    hash_offset: usize,
}

impl<'a> CodeDirectory<'a> {
    /// Decodes a CodeDirectory blob (header included, trimmed to its length).
    pub fn parse(bytes: &'a [u8]) -> Result<Self, SignatureError> {
        let be = Endian::Big;
        let malformed = SignatureError::MalformedSignature;
        let u32_at = |offset: usize| be.read_u32(bytes, offset).ok_or(malformed);
        let u8_at = |offset: usize| bytes.get(offset).copied().ok_or(malformed);

        if u32_at(0)? != CSMAGIC_CODEDIRECTORY {
            return Err(malformed);
        }
        if u32_at(4)? as usize != bytes.len() {
            return Err(malformed);
        }

        let version = u32_at(8)?;
        if version < EARLIEST_VERSION {
            log::debug!("CodeDirectory version {:#x} too old", version);
            return Err(malformed);
        }
        if bytes.len() < fixed_header_len(version) {
            return Err(malformed);
        }

        let flags = u32_at(12)?;
        let hash_offset = u32_at(16)? as usize;
        let ident_offset = u32_at(20)? as usize;
        let n_special_slots = u32_at(24)?;
        let n_code_slots = u32_at(28)?;
        let mut code_limit = u64::from(u32_at(32)?);
        let hash_size = u8_at(36)? as usize;
        let raw_hash_type = u8_at(37)?;
        let platform = u8_at(38)?;
        let page_size_log2 = u8_at(39)?;

        let hash_type = HashType::from_raw(raw_hash_type).ok_or_else(|| {
            log::debug!("Unsupported CodeDirectory hash type {}", raw_hash_type);
            SignatureError::UnsupportedHashType
        })?;
        if hash_size != hash_type.digest_len() {
            return Err(malformed);
        }
        if page_size_log2 != 0 && !(12..=16).contains(&page_size_log2) {
            return Err(malformed);
        }

        if version >= CS_SUPPORTSSCATTER && u32_at(44)? != 0 {
            log::debug!("Scatter vectors are not supported");
            return Err(malformed);
        }

        let team_id = if version >= CS_SUPPORTSTEAMID {
            match u32_at(48)? as usize {
                0 => None,
                offset => Some(c_str_at(bytes, offset).ok_or(malformed)?),
            }
        } else {
            None
        };

        if version >= CS_SUPPORTSCODELIMIT64 {
            let limit64 = be.read_u64(bytes, 56).ok_or(malformed)?;
            if limit64 != 0 {
                code_limit = limit64;
            }
        }

        let exec_segment = if version >= CS_SUPPORTSEXECSEG {
            Some(ExecSegment {
                base: be.read_u64(bytes, 64).ok_or(malformed)?,
                limit: be.read_u64(bytes, 72).ok_or(malformed)?,
                flags: be.read_u64(bytes, 80).ok_or(malformed)?,
            })
        } else {
            None
        };

        let identifier = c_str_at(bytes, ident_offset).ok_or(malformed)?;

        // Hash table must sit after the fixed header and inside the blob
        let special_len = (n_special_slots as usize)
            .checked_mul(hash_size)
            .ok_or(malformed)?;
        let code_len = (n_code_slots as usize).checked_mul(hash_size).ok_or(malformed)?;
        let table_start = hash_offset.checked_sub(special_len).ok_or(malformed)?;
        if table_start < fixed_header_len(version) {
            return Err(malformed);
        }
        slice_at(bytes, hash_offset, code_len).ok_or(malformed)?;

        Ok(Self {
            bytes,
            version,
            flags,
            hash_type,
            hash_size,
            platform,
            page_size_log2,
            n_special_slots,
            n_code_slots,
            code_limit,
            identifier,
            team_id,
            exec_segment,
            hash_offset,
        })
    }

    /// The raw CodeDirectory blob.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Hash stored for code page `index`.
    pub fn code_slot(&self, index: u32) -> Option<&'a [u8]> {
        if index >= self.n_code_slots {
            return None;
        }
        slice_at(self.bytes, self.hash_offset + index as usize * self.hash_size, self.hash_size)
    }

    /// Hash stored for special slot `slot` (1-based).
    pub fn special_slot(&self, slot: u32) -> Option<&'a [u8]> {
        if slot == 0 || slot > self.n_special_slots {
            return None;
        }
        let offset = self.hash_offset - slot as usize * self.hash_size;
        slice_at(self.bytes, offset, self.hash_size)
    }

    /// Page size in bytes, or `None` when a single hash covers the whole code limit.
    pub fn page_size(&self) -> Option<u64> {
        match self.page_size_log2 {
            0 => None,
            shift => Some(1u64 << shift),
        }
    }

    pub fn is_adhoc(&self) -> bool {
        self.flags & CS_ADHOC != 0
    }

    pub fn cdhash(&self) -> CdHash {
        self.hash_type.cdhash(self.bytes)
    }
}
