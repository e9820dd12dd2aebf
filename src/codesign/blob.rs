//! SuperBlob decoding.
//!
//! All fields are big-endian. A SuperBlob is `magic, length, count` followed
//! by `count` index entries `(slot type, offset)`; offsets are relative to
//! the start of the SuperBlob. Every referenced blob starts with its own
//! `magic, length` header, and `length` includes that header.

use super::{
    SignatureError, CSMAGIC_EMBEDDED_SIGNATURE, CSSLOT_ALTERNATE_CODEDIRECTORIES,
    CSSLOT_ALTERNATE_CODEDIRECTORY_MAX, CSSLOT_CODEDIRECTORY,
};
use crate::bytes::{slice_at, Endian};
use alloc::vec::Vec;

const SUPERBLOB_HEADER_SIZE: usize = 12;
const BLOB_INDEX_SIZE: usize = 8;
const BLOB_HEADER_SIZE: usize = 8;

/// A blob referenced from the SuperBlob index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blob<'a> {
    pub slot: u32,
    pub magic: u32,
    /// Whole blob including its 8-byte header.
    pub bytes: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Blob contents after the header.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[BLOB_HEADER_SIZE..]
    }
}

/// The embedded signature container.
#[derive(Debug, Clone)]
pub struct SuperBlob<'a> {
    bytes: &'a [u8],
    blobs: Vec<Blob<'a>>,
}

impl<'a> SuperBlob<'a> {
    /// Decodes and bounds-checks a SuperBlob and every blob it indexes.
    ///
    /// `data` may be longer than the SuperBlob (the `LC_CODE_SIGNATURE`
    /// region is usually padded); the declared length is authoritative.
    pub fn parse(data: &'a [u8]) -> Result<Self, SignatureError> {
        let be = Endian::Big;
        let magic = be.read_u32(data, 0).ok_or(SignatureError::MalformedSignature)?;
        if magic != CSMAGIC_EMBEDDED_SIGNATURE {
            log::debug!("Unexpected SuperBlob magic {:#010x}", magic);
            return Err(SignatureError::MalformedSignature);
        }

        let length = be.read_u32(data, 4).ok_or(SignatureError::MalformedSignature)? as usize;
        let count = be.read_u32(data, 8).ok_or(SignatureError::MalformedSignature)? as usize;

        let bytes = data.get(..length).ok_or(SignatureError::MalformedSignature)?;
        let index_end = count
            .checked_mul(BLOB_INDEX_SIZE)
            .and_then(|n| n.checked_add(SUPERBLOB_HEADER_SIZE))
            .ok_or(SignatureError::MalformedSignature)?;
        if length < SUPERBLOB_HEADER_SIZE || index_end > length {
            return Err(SignatureError::MalformedSignature);
        }

        let mut blobs: Vec<Blob<'a>> = Vec::with_capacity(count);
        let mut ranges: Vec<(usize, usize)> = Vec::with_capacity(count);
        for index in 0..count {
            let entry = SUPERBLOB_HEADER_SIZE + index * BLOB_INDEX_SIZE;
            let slot = be.read_u32(bytes, entry).ok_or(SignatureError::MalformedSignature)?;
            let offset = be.read_u32(bytes, entry + 4).ok_or(SignatureError::MalformedSignature)? as usize;

            if offset < index_end {
                return Err(SignatureError::MalformedSignature);
            }
            if blobs.iter().any(|b| b.slot == slot) {
                log::debug!("Duplicate SuperBlob slot {:#x}", slot);
                return Err(SignatureError::MalformedSignature);
            }

            let blob_magic = be.read_u32(bytes, offset).ok_or(SignatureError::MalformedSignature)?;
            let length_at = offset.checked_add(4).ok_or(SignatureError::MalformedSignature)?;
            let blob_length = be.read_u32(bytes, length_at).ok_or(SignatureError::MalformedSignature)? as usize;
            if blob_length < BLOB_HEADER_SIZE {
                return Err(SignatureError::MalformedSignature);
            }
            let blob_bytes = slice_at(bytes, offset, blob_length).ok_or(SignatureError::MalformedSignature)?;

            ranges.push((offset, offset + blob_length));
            blobs.push(Blob {
                slot,
                magic: blob_magic,
                bytes: blob_bytes,
            });
        }

        ranges.sort_unstable();
        if ranges.windows(2).any(|pair| pair[1].0 < pair[0].1) {
            log::debug!("SuperBlob entries overlap");
            return Err(SignatureError::MalformedSignature);
        }

        Ok(Self { bytes, blobs })
    }

    /// The SuperBlob itself, trimmed to its declared length.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn blobs(&self) -> &[Blob<'a>] {
        &self.blobs
    }

    /// Blob stored in `slot`, if any.
    pub fn blob(&self, slot: u32) -> Option<&Blob<'a>> {
        self.blobs.iter().find(|b| b.slot == slot)
    }

    /// The primary and alternate CodeDirectory blobs, in slot order.
    pub fn code_directories(&self) -> impl Iterator<Item = &Blob<'a>> + '_ {
        let alternates = CSSLOT_ALTERNATE_CODEDIRECTORIES
            ..CSSLOT_ALTERNATE_CODEDIRECTORIES + CSSLOT_ALTERNATE_CODEDIRECTORY_MAX;
        core::iter::once(CSSLOT_CODEDIRECTORY)
            .chain(alternates)
            .filter_map(move |slot| self.blob(slot))
    }
}
