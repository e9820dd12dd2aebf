//! Signature Evaluator.
//!
//! Given a file, selects the Mach-O image, decodes its embedded signature,
//! verifies it structurally and extracts the CDHash and ad-hoc flag.
//!
//! # Verification
//! - Every code page hash in the selected CodeDirectory must match the image.
//! - Requirements and entitlements blobs must match their special slots;
//!   an absent blob must have an empty slot.
//! - When several CodeDirectories are present the strongest digest is used,
//!   and the CDHash is taken from that directory.
//!
//! No certificate chain is validated: "ad-hoc" is a statement about the
//! signature's form (CS_ADHOC or no CMS blob), not about who signed it.

use super::{
    blob::{Blob, SuperBlob},
    code_directory::CodeDirectory,
    CdHash, HashType, SignatureError, SignatureStatus, CSMAGIC_BLOBWRAPPER,
    CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, CSMAGIC_EMBEDDED_ENTITLEMENTS, CSMAGIC_REQUIREMENTS,
    CSSLOT_CMS_SIGNATURE, CSSLOT_DER_ENTITLEMENTS, CSSLOT_ENTITLEMENTS, CSSLOT_REQUIREMENTS,
};
use crate::bytes::{slice_at, slice_at_u64};
use crate::config::StubConfig;
use crate::macho;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

#[cfg(feature = "std")]
use std::path::Path;

/// Blobs bound to the CodeDirectory through special slots, with their expected magic.
const BOUND_BLOBS: [(u32, u32); 3] = [
    (CSSLOT_REQUIREMENTS, CSMAGIC_REQUIREMENTS),
    (CSSLOT_ENTITLEMENTS, CSMAGIC_EMBEDDED_ENTITLEMENTS),
    (CSSLOT_DER_ENTITLEMENTS, CSMAGIC_EMBEDDED_DER_ENTITLEMENTS),
];

/// Result of a successful evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// CDHash of the selected CodeDirectory.
    pub cdhash: CdHash,
    /// Signature is self-signed rather than issued by an authority.
    pub is_adhoc: bool,
    pub hash_type: HashType,
    /// CodeDirectory flags (`CS_ADHOC`, `CS_RUNTIME`, ...).
    pub flags: u32,
    pub version: u32,
    pub identifier: String,
    pub team_id: Option<String>,
    pub platform: u8,
    /// CPU type of the evaluated image.
    pub cpu_type: u32,
    /// Payload of the XML entitlements blob, if present.
    pub entitlements: Option<Vec<u8>>,
}

impl Evaluation {
    /// Always [`SignatureStatus::Success`]; failures never produce an `Evaluation`.
    pub fn status(&self) -> SignatureStatus {
        SignatureStatus::Success
    }
}

/// Evaluates embedded code signatures.
#[derive(Debug, Clone)]
pub struct SignatureEvaluator {
    preferred_cpu: Option<u32>,
    verify_pages: bool,
    max_file_size: u64,
}

impl Default for SignatureEvaluator {
    fn default() -> Self {
        Self::new(&StubConfig::default())
    }
}

impl SignatureEvaluator {
    pub fn new(config: &StubConfig) -> Self {
        Self {
            preferred_cpu: config.preferred_cpu,
            verify_pages: config.verify_pages,
            max_file_size: config.max_file_size,
        }
    }

    /// Evaluates the signature of the file at `path`.
    ///
    /// The file is mapped read-only for the duration of the call.
    #[cfg(feature = "std")]
    pub fn evaluate<P: AsRef<Path>>(&self, path: P) -> Result<Evaluation, SignatureError> {
        let path = path.as_ref();
        // opening a FIFO would block until a writer appears
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(SignatureError::Unreadable);
        }
        if metadata.len() == 0 {
            return Err(SignatureError::NotMachO);
        }
        if metadata.len() > self.max_file_size {
            log::warn!(
                "Refusing to evaluate {} ({} bytes exceeds limit of {})",
                path.display(),
                metadata.len(),
                self.max_file_size
            );
            return Err(SignatureError::FileTooLarge);
        }

        let file = std::fs::File::open(path)?;
        // SAFETY: the map is read-only and dropped before returning; nothing
        // borrowed from it escapes into the `Evaluation`.
        let map = unsafe { memmap2::Mmap::map(&file) }?;

        let result = self.evaluate_bytes(&map);
        match &result {
            Ok(evaluation) => log::debug!(
                "Evaluated {}: cdhash={} adhoc={} identifier={}",
                path.display(),
                evaluation.cdhash,
                evaluation.is_adhoc,
                evaluation.identifier
            ),
            Err(err) => log::debug!("Evaluation of {} failed: {}", path.display(), err),
        }
        result
    }

    /// Evaluates the signature of an in-memory binary.
    pub fn evaluate_bytes(&self, data: &[u8]) -> Result<Evaluation, SignatureError> {
        if data.is_empty() {
            return Err(SignatureError::NotMachO);
        }

        let image = macho::select_image(data, self.preferred_cpu)?;
        let location = image.code_signature()?.ok_or(SignatureError::NoSignature)?;
        let signature = slice_at(image.data(), location.dataoff as usize, location.datasize as usize)
            .ok_or(SignatureError::MalformedSignature)?;

        let superblob = SuperBlob::parse(signature)?;
        check_blob_magics(&superblob)?;

        let mut selected: Option<CodeDirectory<'_>> = None;
        for blob in superblob.code_directories() {
            let cd = CodeDirectory::parse(blob.bytes)?;
            if selected.map_or(true, |best| cd.hash_type.strength() > best.hash_type.strength()) {
                selected = Some(cd);
            }
        }
        let cd = selected.ok_or(SignatureError::MalformedSignature)?;

        if self.verify_pages {
            verify_code_slots(&cd, image.data(), u64::from(location.dataoff))?;
            verify_special_slots(&cd, &superblob)?;
        }

        let is_adhoc = cd.is_adhoc() || !has_cms_signature(&superblob);
        let entitlements = superblob
            .blob(CSSLOT_ENTITLEMENTS)
            .map(|blob| blob.payload().to_vec());

        Ok(Evaluation {
            cdhash: cd.cdhash(),
            is_adhoc,
            hash_type: cd.hash_type,
            flags: cd.flags,
            version: cd.version,
            identifier: cd.identifier.to_string(),
            team_id: cd.team_id.map(|t| t.to_string()),
            platform: cd.platform,
            cpu_type: image.header().cputype,
            entitlements,
        })
    }
}

/// Evaluates `path` with the process-wide configuration.
#[cfg(feature = "std")]
pub fn evaluate_signature<P: AsRef<Path>>(path: P) -> Result<Evaluation, SignatureError> {
    SignatureEvaluator::new(crate::config::process_config()).evaluate(path)
}

fn check_blob_magics(superblob: &SuperBlob<'_>) -> Result<(), SignatureError> {
    let expected = BOUND_BLOBS
        .iter()
        .copied()
        .chain(core::iter::once((CSSLOT_CMS_SIGNATURE, CSMAGIC_BLOBWRAPPER)));
    for (slot, magic) in expected {
        if let Some(blob) = superblob.blob(slot) {
            if blob.magic != magic {
                log::debug!("Slot {:#x} has magic {:#010x}, expected {:#010x}", slot, blob.magic, magic);
                return Err(SignatureError::MalformedSignature);
            }
        }
    }
    Ok(())
}

fn has_cms_signature(superblob: &SuperBlob<'_>) -> bool {
    superblob
        .blob(CSSLOT_CMS_SIGNATURE)
        .map_or(false, |blob: &Blob<'_>| !blob.payload().is_empty())
}

/// Checks every code page hash against the image bytes up to the code limit.
fn verify_code_slots(cd: &CodeDirectory<'_>, image: &[u8], signature_offset: u64) -> Result<(), SignatureError> {
    let limit = cd.code_limit;
    if limit > signature_offset {
        log::debug!("Code limit {:#x} overlaps signature at {:#x}", limit, signature_offset);
        return Err(SignatureError::HashMismatch);
    }

    let page = cd.page_size().unwrap_or_else(|| limit.max(1));
    let expected_slots = limit.div_ceil(page);
    if u64::from(cd.n_code_slots) != expected_slots {
        log::debug!("{} code slots for {} pages", cd.n_code_slots, expected_slots);
        return Err(SignatureError::HashMismatch);
    }

    for index in 0..cd.n_code_slots {
        let start = u64::from(index) * page;
        let end = (start + page).min(limit);
        let chunk = slice_at_u64(image, start, end - start).ok_or(SignatureError::MalformedSignature)?;
        let stored = cd.code_slot(index).ok_or(SignatureError::MalformedSignature)?;
        if !cd.hash_type.matches(chunk, stored) {
            log::debug!("Code page {} hash mismatch", index);
            return Err(SignatureError::HashMismatch);
        }
    }
    Ok(())
}

/// Checks requirements and entitlements blobs against their special slots.
fn verify_special_slots(cd: &CodeDirectory<'_>, superblob: &SuperBlob<'_>) -> Result<(), SignatureError> {
    for (slot, _) in BOUND_BLOBS {
        match (superblob.blob(slot), cd.special_slot(slot)) {
            (Some(blob), Some(stored)) => {
                if !cd.hash_type.matches(blob.bytes, stored) {
                    log::debug!("Special slot {} hash mismatch", slot);
                    return Err(SignatureError::HashMismatch);
                }
            }
            (Some(_), None) => {
                log::debug!("Blob in slot {} is not bound by the CodeDirectory", slot);
                return Err(SignatureError::HashMismatch);
            }
            (None, Some(stored)) => {
                if stored.iter().any(|&b| b != 0) {
                    log::debug!("Special slot {} set but blob missing", slot);
                    return Err(SignatureError::HashMismatch);
                }
            }
            (None, None) => {}
        }
    }
    Ok(())
}
