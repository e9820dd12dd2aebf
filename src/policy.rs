//! Trust Policy.
//!
//! Combines an evaluation with a trust cache. An ad-hoc signature has no
//! signing authority behind it, so the only thing that can vouch for it is
//! the trust cache. Code that is ad-hoc signed *and* present in the trust
//! cache was placed there deliberately; ad-hoc code absent from it runs
//! only when the platform's enforcement is relaxed.

use crate::codesign::Evaluation;
use crate::trust_cache::TrustCache;

#[cfg(feature = "std")]
use crate::codesign::SignatureError;
#[cfg(feature = "std")]
use std::path::Path;

/// Outcome of combining a signature evaluation with a trust cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustAssessment {
    /// Signed with a CMS signature; trust cache membership is irrelevant.
    AuthoritySigned,
    /// Ad-hoc signed and listed in the trust cache.
    AdHocInTrustCache,
    /// Ad-hoc signed and not listed in the trust cache.
    AdHocNotInTrustCache,
}

impl TrustAssessment {
    /// Whether the code is vouched for by either a signer or the trust cache.
    pub fn is_trusted(self) -> bool {
        !matches!(self, TrustAssessment::AdHocNotInTrustCache)
    }
}

/// Assesses `evaluation` against `cache`.
pub fn assess(evaluation: &Evaluation, cache: &TrustCache) -> TrustAssessment {
    if !evaluation.is_adhoc {
        return TrustAssessment::AuthoritySigned;
    }
    if cache.contains(&evaluation.cdhash) {
        TrustAssessment::AdHocInTrustCache
    } else {
        TrustAssessment::AdHocNotInTrustCache
    }
}

/// Evaluates `path` and assesses it against the process-wide trust cache.
#[cfg(feature = "std")]
pub fn assess_file<P: AsRef<Path>>(path: P) -> Result<TrustAssessment, SignatureError> {
    let evaluation = crate::codesign::evaluate_signature(path.as_ref())?;
    let assessment = assess(&evaluation, crate::trust_cache::global::get());
    log::debug!("{}: {:?}", path.as_ref().display(), assessment);
    Ok(assessment)
}
