use super::{MachoError, FAT_MAGIC, FAT_MAGIC_64};
use crate::bytes::{slice_at_u64, Endian};
use alloc::vec::Vec;

const FAT_HEADER_SIZE: usize = 8;
const FAT_ARCH_SIZE: usize = 20;
const FAT_ARCH_64_SIZE: usize = 32;

/// Java class files share `0xcafebabe`; their second word (the class file
/// version) is always larger than any real architecture count.
const MAX_FAT_ARCHES: u32 = 30;

/// One architecture entry of a fat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
}

impl FatArch {
    /// Returns the bytes of this slice within the fat file.
    pub fn slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], MachoError> {
        slice_at_u64(data, self.offset, self.size).ok_or(MachoError::SliceOutOfBounds)
    }
}

/// Parses the (big-endian) fat header and its architecture table.
pub fn parse_fat(data: &[u8]) -> Result<Vec<FatArch>, MachoError> {
    let be = Endian::Big;
    let magic = be.read_u32(data, 0).ok_or(MachoError::NotMachO)?;
    let is_64 = match magic {
        FAT_MAGIC => false,
        FAT_MAGIC_64 => true,
        _ => return Err(MachoError::NotMachO),
    };

    let nfat_arch = be.read_u32(data, 4).ok_or(MachoError::Truncated)?;
    if nfat_arch > MAX_FAT_ARCHES {
        return Err(MachoError::NotMachO);
    }
    if nfat_arch == 0 {
        return Err(MachoError::NoSlices);
    }

    let entry_size = if is_64 { FAT_ARCH_64_SIZE } else { FAT_ARCH_SIZE };
    let mut arches = Vec::with_capacity(nfat_arch as usize);

    for index in 0..nfat_arch as usize {
        let base = FAT_HEADER_SIZE + index * entry_size;
        let field = |offset: usize| be.read_u32(data, base + offset).ok_or(MachoError::Truncated);

        let arch = if is_64 {
            FatArch {
                cputype: field(0)?,
                cpusubtype: field(4)?,
                offset: be.read_u64(data, base + 8).ok_or(MachoError::Truncated)?,
                size: be.read_u64(data, base + 16).ok_or(MachoError::Truncated)?,
                align: field(24)?,
            }
        } else {
            FatArch {
                cputype: field(0)?,
                cpusubtype: field(4)?,
                offset: u64::from(field(8)?),
                size: u64::from(field(12)?),
                align: field(16)?,
            }
        };

        // every slice is checked, selected or not
        arch.slice(data)?;
        arches.push(arch);
    }

    Ok(arches)
}
