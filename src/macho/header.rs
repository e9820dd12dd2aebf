use super::{MachoError, LC_CODE_SIGNATURE, MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use crate::bytes::Endian;

const HEADER_SIZE_32: usize = 28;
const HEADER_SIZE_64: usize = 32;
const LOAD_COMMAND_SIZE: usize = 8;
const LINKEDIT_DATA_COMMAND_SIZE: u32 = 16;

/// Decoded `mach_header` / `mach_header_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachHeader {
    pub endian: Endian,
    pub is_64: bool,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader {
    /// Size of the header preceding the load commands.
    pub fn size(&self) -> usize {
        if self.is_64 {
            HEADER_SIZE_64
        } else {
            HEADER_SIZE_32
        }
    }
}

/// A `linkedit_data_command`: a region in `__LINKEDIT`, relative to the image start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
}

/// A single-architecture Mach-O image.
#[derive(Debug, Clone, Copy)]
pub struct MachO<'a> {
    data: &'a [u8],
    header: MachHeader,
}

impl<'a> MachO<'a> {
    /// Parses the header of a thin image.
    pub fn parse(data: &'a [u8]) -> Result<Self, MachoError> {
        let raw_magic = Endian::Little.read_u32(data, 0).ok_or(MachoError::NotMachO)?;
        let (endian, is_64) = match raw_magic {
            MH_MAGIC => (Endian::Little, false),
            MH_MAGIC_64 => (Endian::Little, true),
            MH_CIGAM => (Endian::Big, false),
            MH_CIGAM_64 => (Endian::Big, true),
            _ => return Err(MachoError::NotMachO),
        };

        let field = |index: usize| endian.read_u32(data, 4 * index).ok_or(MachoError::Truncated);
        let header = MachHeader {
            endian,
            is_64,
            cputype: field(1)?,
            cpusubtype: field(2)?,
            filetype: field(3)?,
            ncmds: field(4)?,
            sizeofcmds: field(5)?,
            flags: field(6)?,
        };

        if data.len() < header.size() {
            return Err(MachoError::Truncated);
        }

        Ok(Self { data, header })
    }

    pub fn header(&self) -> &MachHeader {
        &self.header
    }

    /// Raw bytes of this image (the whole slice for fat files).
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Walks the load command table and returns the `LC_CODE_SIGNATURE` command.
    ///
    /// Every command must be at least 8 bytes and lie inside `sizeofcmds`.
    pub fn code_signature(&self) -> Result<Option<LinkeditData>, MachoError> {
        let endian = self.header.endian;
        let start = self.header.size();
        let end = start
            .checked_add(self.header.sizeofcmds as usize)
            .ok_or(MachoError::Truncated)?;
        if end > self.data.len() {
            return Err(MachoError::Truncated);
        }

        let mut offset = start;
        for _ in 0..self.header.ncmds {
            if end - offset < LOAD_COMMAND_SIZE {
                return Err(MachoError::MalformedLoadCommand);
            }
            let cmd = endian.read_u32(self.data, offset).ok_or(MachoError::Truncated)?;
            let cmdsize = endian.read_u32(self.data, offset + 4).ok_or(MachoError::Truncated)?;

            // offset <= end here, so the remaining length cannot underflow
            if (cmdsize as usize) < LOAD_COMMAND_SIZE || cmdsize as usize > end - offset {
                return Err(MachoError::MalformedLoadCommand);
            }

            if cmd == LC_CODE_SIGNATURE {
                if cmdsize < LINKEDIT_DATA_COMMAND_SIZE {
                    return Err(MachoError::MalformedLoadCommand);
                }
                let dataoff = endian.read_u32(self.data, offset + 8).ok_or(MachoError::Truncated)?;
                let datasize = endian.read_u32(self.data, offset + 12).ok_or(MachoError::Truncated)?;
                return Ok(Some(LinkeditData { dataoff, datasize }));
            }

            offset += cmdsize as usize;
        }

        Ok(None)
    }
}
