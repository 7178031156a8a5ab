//! # Version Resolver
//!
//! Turns a [`ConstraintManifest`] and a fetched [`VersionCatalog`] into a
//! [`PinnedManifest`] for one release.
//!
//! Resolution is a pure, synchronous function of its inputs. Every package is
//! resolved independently, and every problem found is collected as a
//! [`Blocker`] instead of stopping at the first one, so a single run tells the
//! release manager everything that stands in the way of the release.
//!
//! ## Rules
//!
//! - The highest version inside the declared range is chosen.
//! - Prereleases are only eligible in alpha releases, or when the constraint
//!   opts into them.
//! - Once a release is frozen, a package may never resolve below the version
//!   pinned by the previous run of the same release, and the package set may
//!   not change.
//! - Manual pins are honoured verbatim when they lie inside the range, and
//!   bypass the frozen regression check.

use std::collections::BTreeMap;
use std::fmt;

use semver::Version;
use thiserror::Error;

use crate::catalog::{CatalogEntry, CoreRelease, VersionCatalog};
use crate::index::FetchError;
use crate::manifest::{ConstraintManifest, PinnedManifest};
use crate::name::{PackageName, Subject};
use crate::phase::ReleasePhase;
use crate::version::{ReleaseId, VersionConstraint};


//================================================================================================
// Types
//================================================================================================

/// Manual pins supplied by the operator, keyed by package.
pub type Pins = BTreeMap<PackageName, Version>;

/// Why a subject could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// No catalog version lies inside the constraint and passes the prerelease policy.
    #[error("no available version satisfies the constraint")]
    NoSatisfyingVersion,
    /// The best candidate is lower than the version the release is frozen at.
    #[error("best candidate {candidate} is lower than the frozen pin {prior}")]
    FrozenRegression {
        /// The previously pinned version.
        prior: String,
        /// The highest admissible version found now.
        candidate: String,
    },
    /// The catalog slot could not be fetched.
    #[error(transparent)]
    FetchFailed(FetchError),
    /// The catalog holds no slot for the subject at all.
    #[error("no catalog entry was fetched")]
    NotInCatalog,
    /// A manual pin lies outside the declared range.
    #[error("manual pin {0} lies outside the constraint")]
    PinOutsideConstraint(Version),
    /// The package is not part of the frozen package set.
    #[error("package was added after the feature freeze")]
    AddedAfterFreeze,
    /// A package of the frozen package set is no longer declared.
    #[error("package was removed after the feature freeze")]
    RemovedAfterFreeze,
    /// Neither the manifest nor the chosen core release declare a runtime requirement.
    #[error("no runtime requirement is declared by the manifest or the chosen core release")]
    RuntimeUnknown,
}

/// One reason a release cannot be pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    /// The package, or the core runtime.
    pub subject: Subject,
    /// The declared constraint, when the subject has one.
    pub constraint: Option<String>,
    /// What went wrong.
    pub reason: BlockReason,
}

/// Every blocker found while resolving, core first, then packages by name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} blocker(s) prevent resolution{}", .blockers.len(), BlockerList(.blockers))]
pub struct ResolutionError {
    /// The collected blockers.
    pub blockers: Vec<Blocker>,
}

/// A best-effort resolution: whatever could be resolved, plus every blocker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialResolution {
    /// The packages that resolved.
    pub packages: BTreeMap<PackageName, Version>,
    /// The chosen core release, if the core resolved.
    pub core: Option<CoreRelease>,
    /// The runtime requirement, if it could be determined.
    pub runtime: Option<String>,
    /// Everything that did not resolve.
    pub blockers: Vec<Blocker>,
}

/// Resolves one release against a catalog snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    constraints: &'a ConstraintManifest,
    catalog: &'a VersionCatalog,
    phase: ReleasePhase,
    prior: Option<&'a PinnedManifest>,
    pins: Option<&'a Pins>,
    confirmed: bool,
}

struct BlockerList<'a>(&'a [Blocker]);

//================================================================================================
// Impls
//================================================================================================

impl BlockReason {
    /// The stable snake_case name of the reason.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::NoSatisfyingVersion => "no_satisfying_version",
            BlockReason::FrozenRegression { .. } => "frozen_regression",
            BlockReason::FetchFailed(_) => "fetch_failed",
            BlockReason::NotInCatalog => "not_in_catalog",
            BlockReason::PinOutsideConstraint(_) => "pin_outside_constraint",
            BlockReason::AddedAfterFreeze => "added_after_freeze",
            BlockReason::RemovedAfterFreeze => "removed_after_freeze",
            BlockReason::RuntimeUnknown => "runtime_unknown",
        }
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.subject)?;
        if let Some(c) = &self.constraint {
            write!(f, " ({c})")?;
        }
        write!(f, ": {} [{}]", self.reason, self.reason.code())
    }
}

impl fmt::Display for BlockerList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for blocker in self.0 {
            write!(f, "\n  - {blocker}")?;
        }
        Ok(())
    }
}

impl PartialResolution {
    /// Whether nothing blocks the release.
    pub fn is_complete(&self) -> bool {
        self.blockers.is_empty()
    }
}

impl<'a> Resolver<'a> {
    /// A resolver for `constraints` over `catalog` under the rules of `phase`.
    pub fn new(
        constraints: &'a ConstraintManifest,
        catalog: &'a VersionCatalog,
        phase: ReleasePhase,
    ) -> Self {
        Resolver {
            constraints,
            catalog,
            phase,
            prior: None,
            pins: None,
            confirmed: false,
        }
    }

    /// The pinned manifest of an earlier run of the same release.
    pub fn prior(mut self, prior: Option<&'a PinnedManifest>) -> Self {
        self.prior = prior;
        self
    }

    /// Manual pins that take precedence over the catalog.
    pub fn pins(mut self, pins: &'a Pins) -> Self {
        self.pins = Some(pins);
        self
    }

    /// Lets packages dropped after the freeze through; the operator confirmed the removal.
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// Resolves the release, failing with every blocker if any subject is unresolved.
    pub fn resolve(&self, release: ReleaseId) -> Result<PinnedManifest, ResolutionError> {
        let partial = self.resolve_partial();
        match (partial.core, partial.runtime) {
            (Some(core), Some(runtime)) if partial.blockers.is_empty() => Ok(PinnedManifest {
                release,
                core: core.version,
                runtime,
                packages: partial.packages,
            }),
            _ => Err(ResolutionError {
                blockers: partial.blockers,
            }),
        }
    }

    /// Resolves everything that can be resolved and reports the rest.
    pub fn resolve_partial(&self) -> PartialResolution {
        let mut resolution = PartialResolution::default();

        match self.core() {
            Ok(core) => {
                let runtime = self
                    .constraints
                    .runtime
                    .clone()
                    .or_else(|| core.requires_runtime.clone());
                match runtime {
                    Some(runtime) => resolution.runtime = Some(runtime),
                    None => resolution.blockers.push(Blocker {
                        subject: Subject::Core,
                        constraint: Some(self.constraints.core.to_string()),
                        reason: BlockReason::RuntimeUnknown,
                    }),
                }
                resolution.core = Some(core);
            },
            Err(reason) => resolution.blockers.push(Blocker {
                subject: Subject::Core,
                constraint: Some(self.constraints.core.to_string()),
                reason,
            }),
        }

        for (name, constraint) in &self.constraints.packages {
            match self.package(name, constraint) {
                Ok(version) => {
                    resolution.packages.insert(name.clone(), version);
                },
                Err(reason) => resolution.blockers.push(Blocker {
                    subject: Subject::Package(name.clone()),
                    constraint: Some(constraint.to_string()),
                    reason,
                }),
            }
        }

        if let Some(prior) = self.frozen_prior() {
            for name in prior.packages.keys() {
                if self.constraints.packages.contains_key(name) {
                    continue;
                }
                if self.confirmed {
                    tracing::warn!(package = %name, "confirmed removal after freeze");
                } else {
                    resolution.blockers.push(Blocker {
                        subject: Subject::Package(name.clone()),
                        constraint: None,
                        reason: BlockReason::RemovedAfterFreeze,
                    });
                }
            }
        }

        resolution
            .blockers
            .sort_by(|a, b| a.subject.cmp(&b.subject));

        tracing::info!(
            phase = %self.phase,
            resolved = resolution.packages.len(),
            blockers = resolution.blockers.len(),
            "resolution finished"
        );
        resolution
    }

    fn frozen_prior(&self) -> Option<&'a PinnedManifest> {
        self.prior.filter(|_| self.phase.is_frozen())
    }

    fn core(&self) -> Result<CoreRelease, BlockReason> {
        let entry = self.catalog.core().ok_or(BlockReason::NotInCatalog)?;
        if let CatalogEntry::FetchFailed(e) = entry {
            return Err(BlockReason::FetchFailed(e.clone()));
        }
        let constraint = &self.constraints.core;
        let best = entry
            .versions()
            .iter()
            .filter(|c| constraint.admits(c.version.as_version(), self.phase.admits_prereleases()))
            .max()
            .ok_or(BlockReason::NoSatisfyingVersion)?;

        if let Some(prior) = self.frozen_prior() {
            if best.version < prior.core {
                return Err(BlockReason::FrozenRegression {
                    prior: prior.core.to_string(),
                    candidate: best.version.to_string(),
                });
            }
        }
        Ok(best.clone())
    }

    fn package(
        &self,
        name: &PackageName,
        constraint: &VersionConstraint,
    ) -> Result<Version, BlockReason> {
        if let Some(pin) = self.pins.and_then(|p| p.get(name)) {
            if !constraint.range.contains(pin) {
                return Err(BlockReason::PinOutsideConstraint(pin.clone()));
            }
            tracing::warn!(
                package = %name,
                version = %pin,
                constraint = %constraint,
                "using manual pin"
            );
            return Ok(pin.clone());
        }

        let prior = self.frozen_prior().map(|p| p.packages.get(name));
        if let Some(None) = prior {
            return Err(BlockReason::AddedAfterFreeze);
        }

        let entry = self.catalog.get(name).ok_or(BlockReason::NotInCatalog)?;
        if let CatalogEntry::FetchFailed(e) = entry {
            return Err(BlockReason::FetchFailed(e.clone()));
        }

        let best = entry
            .versions()
            .iter()
            .filter(|v| constraint.admits(v, self.phase.admits_prereleases()))
            .max()
            .ok_or(BlockReason::NoSatisfyingVersion)?;

        if let Some(Some(pinned)) = prior {
            if best < pinned {
                return Err(BlockReason::FrozenRegression {
                    prior: pinned.to_string(),
                    candidate: best.to_string(),
                });
            }
        }
        tracing::debug!(package = %name, version = %best, "resolved");
        Ok(best.clone())
    }
}
