//! Release phases and the policies they govern.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::{PreKind, ReleaseId};

//================================================================================================
// Types
//================================================================================================

/// Where a release sits in the alpha to patch lifecycle of its track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleasePhase {
    /// `X.Y.ZaN`
    Alpha,
    /// `X.Y.Zb1`, the release that establishes the feature freeze.
    BetaFirst,
    /// `X.Y.ZbN` for `N > 1`.
    BetaSubsequent,
    /// `X.Y.ZrcN`
    Rc,
    /// `X.0.0`
    Final,
    /// Any later final release of the track.
    Patch,
}

/// Raised when a phase name is not recognised.
#[derive(thiserror::Error, Debug)]
#[error("unknown release phase `{0}`")]
pub struct PhaseError(String);

//================================================================================================
// Impls
//================================================================================================

impl ReleasePhase {
    /// Whether prereleases of member packages are eligible without a per-package override.
    pub fn admits_prereleases(self) -> bool {
        matches!(self, ReleasePhase::Alpha)
    }

    /// Whether the package set and existing pins are frozen.
    pub fn is_frozen(self) -> bool {
        !matches!(self, ReleasePhase::Alpha | ReleasePhase::BetaFirst)
    }

    /// Whether ranges are narrowed to bugfix updates before resolving.
    pub fn narrows_to_bugfix(self) -> bool {
        matches!(
            self,
            ReleasePhase::BetaSubsequent | ReleasePhase::Rc | ReleasePhase::Final
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            ReleasePhase::Alpha => "alpha",
            ReleasePhase::BetaFirst => "beta-first",
            ReleasePhase::BetaSubsequent => "beta-subsequent",
            ReleasePhase::Rc => "rc",
            ReleasePhase::Final => "final",
            ReleasePhase::Patch => "patch",
        }
    }
}

impl From<&ReleaseId> for ReleasePhase {
    fn from(release: &ReleaseId) -> Self {
        match release.prerelease() {
            Some((PreKind::Alpha, _)) => ReleasePhase::Alpha,
            Some((PreKind::Beta, 1)) => ReleasePhase::BetaFirst,
            Some((PreKind::Beta, _)) => ReleasePhase::BetaSubsequent,
            Some((PreKind::Rc, _)) => ReleasePhase::Rc,
            None if release.minor() == 0 && release.patch() == 0 => ReleasePhase::Final,
            None => ReleasePhase::Patch,
        }
    }
}

impl FromStr for ReleasePhase {
    type Err = PhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ReleasePhase::Alpha,
            ReleasePhase::BetaFirst,
            ReleasePhase::BetaSubsequent,
            ReleasePhase::Rc,
            ReleasePhase::Final,
            ReleasePhase::Patch,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
        .ok_or_else(|| PhaseError(s.to_owned()))
    }
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//================================================================================================
// Tests
//================================================================================================
