//! Mach-O Container Reader.
//!
//! Locates the embedded code signature inside a binary. Handles:
//! - Thin Mach-O images, 32- and 64-bit, in either byte order.
//! - Fat (universal) files, selecting one architecture slice.
//!
//! Only the pieces needed to find `LC_CODE_SIGNATURE` are decoded. All
//! offsets read from the file are checked against the buffer before use.

pub mod fat;
pub mod header;

pub use fat::FatArch;
pub use header::{LinkeditData, MachHeader, MachO};

use core::fmt;

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

pub const LC_CODE_SIGNATURE: u32 = 0x1d;

pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;
pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;

/// Errors raised while decoding the Mach-O container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachoError {
    /// Magic number is neither thin nor fat Mach-O.
    NotMachO,
    /// Header or load command table runs past the end of the data.
    Truncated,
    /// A load command has an impossible size.
    MalformedLoadCommand,
    /// A fat slice lies outside the file.
    SliceOutOfBounds,
    /// Fat header declares no architectures.
    NoSlices,
}

impl fmt::Display for MachoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachoError::NotMachO => write!(f, "Not a Mach-O file"),
            MachoError::Truncated => write!(f, "Mach-O data truncated"),
            MachoError::MalformedLoadCommand => write!(f, "Malformed load command"),
            MachoError::SliceOutOfBounds => write!(f, "Fat slice out of bounds"),
            MachoError::NoSlices => write!(f, "Fat file contains no slices"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MachoError {}

/// Returns a short name for well-known CPU types.
pub fn cpu_type_name(cputype: u32) -> &'static str {
    match cputype {
        CPU_TYPE_X86 => "i386",
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_ARM => "armv7",
        CPU_TYPE_ARM64 => "arm64",
        CPU_TYPE_ARM64_32 => "arm64_32",
        _ => "unknown",
    }
}

/// Parses a CPU type given by name (`arm64`, `x86_64`, ...) or number
/// (decimal or `0x` hex).
pub fn parse_cpu_type(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "i386" | "x86" => return Some(CPU_TYPE_X86),
        "x86_64" | "amd64" => return Some(CPU_TYPE_X86_64),
        "arm" | "armv7" | "armv7s" => return Some(CPU_TYPE_ARM),
        "arm64" | "arm64e" | "aarch64" => return Some(CPU_TYPE_ARM64),
        "arm64_32" => return Some(CPU_TYPE_ARM64_32),
        _ => {}
    }
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Picks the Mach-O image to evaluate from a thin or fat file.
///
/// For fat files the slice whose CPU type equals `preferred_cpu` wins,
/// otherwise the first slice is used.
pub fn select_image(data: &[u8], preferred_cpu: Option<u32>) -> Result<MachO<'_>, MachoError> {
    let magic = crate::bytes::Endian::Big
        .read_u32(data, 0)
        .ok_or(MachoError::NotMachO)?;

    if magic == FAT_MAGIC || magic == FAT_MAGIC_64 {
        let arches = fat::parse_fat(data)?;
        let arch = preferred_cpu
            .and_then(|cpu| arches.iter().find(|a| a.cputype == cpu))
            .or_else(|| arches.first())
            .ok_or(MachoError::NoSlices)?;

        log::debug!(
            "Fat file with {} slices, selected {} at offset {:#x}",
            arches.len(),
            cpu_type_name(arch.cputype),
            arch.offset
        );

        let slice = arch.slice(data)?;
        return MachO::parse(slice);
    }

    MachO::parse(data)
}
