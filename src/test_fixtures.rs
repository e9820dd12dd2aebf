//! Synthetic signed Mach-O images and trust cache payloads for tests.

use crate::codesign::{
    CdHash, HashType, SignatureEvaluator, CSMAGIC_BLOBWRAPPER, CSMAGIC_CODEDIRECTORY,
    CSMAGIC_EMBEDDED_ENTITLEMENTS, CSMAGIC_EMBEDDED_SIGNATURE, CSMAGIC_REQUIREMENTS,
    CSSLOT_ALTERNATE_CODEDIRECTORIES, CSSLOT_CMS_SIGNATURE, CSSLOT_CODEDIRECTORY,
    CSSLOT_ENTITLEMENTS, CSSLOT_REQUIREMENTS, CS_ADHOC,
};
use crate::codesign::code_directory::{fixed_header_len, CS_SUPPORTSCODELIMIT64, CS_SUPPORTSTEAMID};
use crate::macho::{CPU_TYPE_ARM, CPU_TYPE_ARM64, FAT_MAGIC, FAT_MAGIC_64, LC_CODE_SIGNATURE, MH_MAGIC, MH_MAGIC_64};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};
use std::sync::Once;

const HEADER_SIZE_32: usize = 28;
const HEADER_SIZE_64: usize = 32;
const LC_SIZE: usize = 16;
const PAGE_SHIFT: u8 = 12;
const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
const CD_HEADER_LEN: usize = 88;
const CD_VERSION: u32 = 0x20400;
const MH_EXECUTE: u32 = 2;

fn digest(hash_type: HashType, data: &[u8]) -> Vec<u8> {
    let full = match hash_type {
        HashType::Sha1 => Sha1::digest(data).to_vec(),
        HashType::Sha256 | HashType::Sha256Truncated => Sha256::digest(data).to_vec(),
        HashType::Sha384 => Sha384::digest(data).to_vec(),
    };
    full[..hash_type.digest_len()].to_vec()
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn blob(magic: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&magic.to_be_bytes());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Builder for a thin Mach-O image with an embedded signature.
///
/// Defaults to a 64-bit little-endian arm64 image with a SHA-256
/// CodeDirectory of version 0x20400 and 4 KiB pages.
#[derive(Debug, Clone)]
pub struct SignedMachO {
    identifier: String,
    team_id: Option<String>,
    hash_types: Vec<HashType>,
    adhoc: bool,
    cms: Option<Vec<u8>>,
    entitlements: Option<Vec<u8>>,
    requirements: bool,
    signed: bool,
    cpu_type: u32,
    code_size: usize,
    is_64: bool,
    big_endian: bool,
    cd_version: u32,
    page_shift: u8,
    code_limit64: bool,
}

impl SignedMachO {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            team_id: None,
            hash_types: vec![HashType::Sha256],
            adhoc: false,
            cms: Some(b"fixture-cms-signature".to_vec()),
            entitlements: None,
            requirements: false,
            signed: true,
            cpu_type: CPU_TYPE_ARM64,
            code_size: 3 * PAGE_SIZE + 100,
            is_64: true,
            big_endian: false,
            cd_version: CD_VERSION,
            page_shift: PAGE_SHIFT,
            code_limit64: false,
        }
    }

    pub fn team_id(mut self, team_id: &str) -> Self {
        self.team_id = Some(team_id.to_string());
        self
    }

    /// First entry goes to the primary slot, the rest to alternate slots.
    pub fn hash_types(mut self, hash_types: &[HashType]) -> Self {
        self.hash_types = hash_types.to_vec();
        self
    }

    /// Sets CS_ADHOC and drops the CMS blob.
    pub fn adhoc(mut self) -> Self {
        self.adhoc = true;
        self.cms = None;
        self
    }

    pub fn cms(mut self, payload: &[u8]) -> Self {
        self.cms = Some(payload.to_vec());
        self
    }

    pub fn without_cms(mut self) -> Self {
        self.cms = None;
        self
    }

    pub fn entitlements(mut self, xml: &[u8]) -> Self {
        self.entitlements = Some(xml.to_vec());
        self
    }

    pub fn requirements(mut self) -> Self {
        self.requirements = true;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn cpu_type(mut self, cpu_type: u32) -> Self {
        self.cpu_type = cpu_type;
        self
    }

    /// 32-bit `mach_header` with an armv7 CPU type.
    pub fn thirty_two_bit(mut self) -> Self {
        self.is_64 = false;
        self.cpu_type = CPU_TYPE_ARM;
        self
    }

    /// Header and load commands in big-endian byte order.
    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn cd_version(mut self, version: u32) -> Self {
        self.cd_version = version;
        self
    }

    /// log2 of the page size; 0 hashes the whole code limit as one page.
    pub fn page_shift(mut self, shift: u8) -> Self {
        self.page_shift = shift;
        self
    }

    /// Stores the code limit in `codeLimit64` and leaves the 32-bit field zero.
    pub fn code_limit64(mut self) -> Self {
        assert!(self.cd_version >= CS_SUPPORTSCODELIMIT64);
        self.code_limit64 = true;
        self
    }

    fn header_size(&self) -> usize {
        if self.is_64 {
            HEADER_SIZE_64
        } else {
            HEADER_SIZE_32
        }
    }

    fn put32(&self, out: &mut [u8], offset: usize, value: u32) {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        out[offset..offset + 4].copy_from_slice(&bytes);
    }

    fn page_len(&self) -> usize {
        match self.page_shift {
            0 => self.signature_offset(),
            shift => 1 << shift,
        }
    }

    /// Offset of the first byte after the load commands.
    pub fn code_offset(&self) -> usize {
        self.header_size() + LC_SIZE
    }

    /// Offset of the SuperBlob; also the code limit.
    pub fn signature_offset(&self) -> usize {
        align_up(self.code_size, 16)
    }

    fn n_special_slots(&self) -> u32 {
        if self.entitlements.is_some() {
            CSSLOT_ENTITLEMENTS
        } else if self.requirements {
            CSSLOT_REQUIREMENTS
        } else {
            0
        }
    }

    fn n_code_slots(&self) -> u32 {
        self.signature_offset().div_ceil(self.page_len()) as u32
    }

    fn code_directory_len(&self, hash_type: HashType) -> usize {
        let strings = self.identifier.len() + 1 + self.team_id.as_ref().map_or(0, |t| t.len() + 1);
        let slots = (self.n_special_slots() + self.n_code_slots()) as usize;
        fixed_header_len(self.cd_version) + strings + slots * hash_type.digest_len()
    }

    /// Non-CodeDirectory blobs, by slot.
    fn side_blobs(&self) -> Vec<(u32, Vec<u8>)> {
        let mut blobs = Vec::new();
        if self.requirements {
            // empty requirements vector: count = 0
            blobs.push((CSSLOT_REQUIREMENTS, blob(CSMAGIC_REQUIREMENTS, &0u32.to_be_bytes())));
        }
        if let Some(xml) = &self.entitlements {
            blobs.push((CSSLOT_ENTITLEMENTS, blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, xml)));
        }
        if let Some(cms) = &self.cms {
            blobs.push((CSSLOT_CMS_SIGNATURE, blob(CSMAGIC_BLOBWRAPPER, cms)));
        }
        blobs
    }

    fn code_directory(&self, hash_type: HashType, image: &[u8], side_blobs: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let hash_size = hash_type.digest_len();
        let length = self.code_directory_len(hash_type);
        let n_special = self.n_special_slots();
        let n_code = self.n_code_slots();

        let header_len = fixed_header_len(self.cd_version);
        let ident_offset = header_len;
        let mut strings_end = ident_offset + self.identifier.len() + 1;
        let team_offset = match &self.team_id {
            Some(team) if self.cd_version >= CS_SUPPORTSTEAMID => {
                let offset = strings_end;
                strings_end += team.len() + 1;
                offset
            }
            Some(team) => {
                strings_end += team.len() + 1;
                0
            }
            None => 0,
        };
        let hash_offset = strings_end + n_special as usize * hash_size;

        let mut cd = Vec::with_capacity(length);
        let put32 = |cd: &mut Vec<u8>, v: u32| cd.extend_from_slice(&v.to_be_bytes());
        let put64 = |cd: &mut Vec<u8>, v: u64| cd.extend_from_slice(&v.to_be_bytes());

        put32(&mut cd, CSMAGIC_CODEDIRECTORY);
        put32(&mut cd, length as u32);
        put32(&mut cd, self.cd_version);
        put32(&mut cd, if self.adhoc { CS_ADHOC } else { 0 });
        put32(&mut cd, hash_offset as u32);
        put32(&mut cd, ident_offset as u32);
        put32(&mut cd, n_special);
        put32(&mut cd, n_code);
        let limit = self.signature_offset();
        put32(&mut cd, if self.code_limit64 { 0 } else { limit as u32 });
        cd.extend_from_slice(&[hash_size as u8, hash_type as u8, 0, self.page_shift]);
        put32(&mut cd, 0); // spare2
        put32(&mut cd, 0); // scatterOffset
        put32(&mut cd, team_offset as u32);
        put32(&mut cd, 0); // spare3
        put64(&mut cd, if self.code_limit64 { limit as u64 } else { 0 }); // codeLimit64
        put64(&mut cd, 0); // execSegBase
        put64(&mut cd, PAGE_SIZE as u64); // execSegLimit
        put64(&mut cd, 1); // execSegFlags: main binary
        assert_eq!(cd.len(), CD_HEADER_LEN);
        cd.truncate(header_len);

        cd.extend_from_slice(self.identifier.as_bytes());
        cd.push(0);
        if let Some(team) = &self.team_id {
            cd.extend_from_slice(team.as_bytes());
            cd.push(0);
        }

        for slot in (1..=n_special).rev() {
            match side_blobs.iter().find(|(s, _)| *s == slot) {
                Some((_, bytes)) => cd.extend_from_slice(&digest(hash_type, bytes)),
                None => cd.extend(core::iter::repeat(0u8).take(hash_size)),
            }
        }
        assert_eq!(cd.len(), hash_offset);

        for chunk in image.chunks(self.page_len()) {
            cd.extend_from_slice(&digest(hash_type, chunk));
        }
        assert_eq!(cd.len(), length);
        cd
    }

    pub fn build(&self) -> Vec<u8> {
        let sig_offset = self.signature_offset();
        let mut image = vec![0u8; sig_offset];
        for (i, byte) in image[self.code_offset()..self.code_size].iter_mut().enumerate() {
            *byte = (i * 31 % 251) as u8;
        }

        let magic = if self.is_64 { MH_MAGIC_64 } else { MH_MAGIC };
        self.put32(&mut image, 0, magic);
        self.put32(&mut image, 4, self.cpu_type);
        self.put32(&mut image, 12, MH_EXECUTE);

        if !self.signed {
            return image;
        }

        let side_blobs = self.side_blobs();
        let cd_slots: Vec<u32> = (0..self.hash_types.len() as u32)
            .map(|i| match i {
                0 => CSSLOT_CODEDIRECTORY,
                n => CSSLOT_ALTERNATE_CODEDIRECTORIES + n - 1,
            })
            .collect();

        let count = cd_slots.len() + side_blobs.len();
        let superblob_len = 12
            + 8 * count
            + self.hash_types.iter().map(|&ht| self.code_directory_len(ht)).sum::<usize>()
            + side_blobs.iter().map(|(_, b)| b.len()).sum::<usize>();

        let lc = self.header_size();
        self.put32(&mut image, 16, 1);
        self.put32(&mut image, 20, LC_SIZE as u32);
        self.put32(&mut image, lc, LC_CODE_SIGNATURE);
        self.put32(&mut image, lc + 4, LC_SIZE as u32);
        self.put32(&mut image, lc + 8, sig_offset as u32);
        self.put32(&mut image, lc + 12, superblob_len as u32);

        let mut blobs: Vec<(u32, Vec<u8>)> = self
            .hash_types
            .iter()
            .zip(&cd_slots)
            .map(|(&ht, &slot)| (slot, self.code_directory(ht, &image, &side_blobs)))
            .collect();
        blobs.extend(side_blobs);
        blobs.sort_by_key(|(slot, _)| *slot);

        let mut superblob = Vec::with_capacity(superblob_len);
        superblob.extend_from_slice(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
        superblob.extend_from_slice(&(superblob_len as u32).to_be_bytes());
        superblob.extend_from_slice(&(count as u32).to_be_bytes());
        let mut offset = 12 + 8 * count;
        for (slot, bytes) in &blobs {
            superblob.extend_from_slice(&slot.to_be_bytes());
            superblob.extend_from_slice(&(offset as u32).to_be_bytes());
            offset += bytes.len();
        }
        for (_, bytes) in &blobs {
            superblob.extend_from_slice(bytes);
        }
        assert_eq!(superblob.len(), superblob_len);

        image.extend_from_slice(&superblob);
        image
    }
}

/// Wraps thin images into a fat file with page-aligned slices.
pub fn fat_binary<B: AsRef<[u8]>>(slices: &[(u32, B)]) -> Vec<u8> {
    build_fat(FAT_MAGIC, slices)
}

/// Same as [`fat_binary`] with the 64-bit `fat_arch_64` table.
pub fn fat64_binary<B: AsRef<[u8]>>(slices: &[(u32, B)]) -> Vec<u8> {
    build_fat(FAT_MAGIC_64, slices)
}

fn build_fat<B: AsRef<[u8]>>(magic: u32, slices: &[(u32, B)]) -> Vec<u8> {
    let is_64 = magic == FAT_MAGIC_64;
    let entry_len = if is_64 { 32 } else { 20 };
    let header_len = 8 + entry_len * slices.len();
    let mut out = Vec::new();
    out.extend_from_slice(&magic.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = align_up(header_len, PAGE_SIZE);
    let mut placements = Vec::new();
    for (cpu, data) in slices {
        let len = data.as_ref().len();
        out.extend_from_slice(&cpu.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        if is_64 {
            out.extend_from_slice(&(offset as u64).to_be_bytes());
            out.extend_from_slice(&(len as u64).to_be_bytes());
            out.extend_from_slice(&u32::from(PAGE_SHIFT).to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes()); // reserved
        } else {
            out.extend_from_slice(&(offset as u32).to_be_bytes());
            out.extend_from_slice(&(len as u32).to_be_bytes());
            out.extend_from_slice(&u32::from(PAGE_SHIFT).to_be_bytes());
        }
        placements.push(offset);
        offset = align_up(offset + len, PAGE_SIZE);
    }

    for ((_, data), start) in slices.iter().zip(placements) {
        out.resize(start, 0);
        out.extend_from_slice(data.as_ref());
    }
    out
}

/// Offset of the primary CodeDirectory within a built image.
pub fn code_directory_offset(binary: &[u8], fixture: &SignedMachO) -> usize {
    // first index entry is slot 0
    let entry = fixture.signature_offset() + 16;
    let offset = u32::from_be_bytes(binary[entry..entry + 4].try_into().unwrap());
    fixture.signature_offset() + offset as usize
}

/// Binary trust cache payload of the given format version.
pub fn trust_cache_binary(version: u32, hashes: &[CdHash]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&[0x11; 16]);
    out.extend_from_slice(&(hashes.len() as u32).to_le_bytes());
    for hash in hashes {
        out.extend_from_slice(hash.as_bytes());
        match version {
            0 => {}
            1 => out.extend_from_slice(&[HashType::Sha256 as u8, 0]),
            _ => out.extend_from_slice(&[HashType::Sha256 as u8, 0, 1, 0]),
        }
    }
    out
}

/// Ad-hoc image whose CDHash is in the process-wide fixture trust cache.
pub fn trusted_fixture() -> SignedMachO {
    SignedMachO::new("com.example.trusted").adhoc()
}

/// Installs the process-wide trust cache used by tests.
///
/// Must run before anything in the test binary reads the global cache.
pub fn install_global_trust_cache() -> CdHash {
    static INSTALL: Once = Once::new();
    let trusted = SignatureEvaluator::default()
        .evaluate_bytes(&trusted_fixture().build())
        .expect("fixture evaluates")
        .cdhash;
    INSTALL.call_once(|| {
        let cache = crate::trust_cache::TrustCache::from_hashes([trusted, CdHash::new([0x42; 20])]);
        crate::trust_cache::global::install(cache).expect("global trust cache installed first");
    });
    trusted
}
