//! Bounds-checked integer reads over untrusted byte buffers.
//!
//! Mach-O headers come in either byte order; code signature blobs are
//! always big-endian; trust cache payloads are little-endian. Every read
//! returns `None` instead of panicking when it would run past the buffer.

/// Byte order of a structure being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Reads a `u32` at `offset`.
    pub fn read_u32(self, data: &[u8], offset: usize) -> Option<u32> {
        let raw: [u8; 4] = slice_at(data, offset, 4)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    /// Reads a `u64` at `offset`.
    pub fn read_u64(self, data: &[u8], offset: usize) -> Option<u64> {
        let raw: [u8; 8] = slice_at(data, offset, 8)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }
}

/// Returns `data[offset..offset + len]` if the whole range is in bounds.
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    data.get(offset..end)
}

/// Same as [`slice_at`] for offsets and lengths stored as `u64` on disk.
pub fn slice_at_u64(data: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    let offset = usize::try_from(offset).ok()?;
    let len = usize::try_from(len).ok()?;
    slice_at(data, offset, len)
}

/// Reads a NUL-terminated UTF-8 string starting at `offset`.
pub fn c_str_at(data: &[u8], offset: usize) -> Option<&str> {
    let tail = data.get(offset..)?;
    let nul = tail.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&tail[..nul]).ok()
}
