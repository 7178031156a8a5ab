//! # Structural Diff
//!
//! Compares two versions of a build file, or two deps files, and classifies
//! every difference. Once a release is frozen, changes that can take
//! something away from users must be confirmed by the operator; see [`gate`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::{ConstraintManifest, PinnedManifest};
use crate::name::{PackageName, Subject};
use crate::phase::ReleasePhase;
use crate::version::VersionConstraint;

//================================================================================================
// Types
//================================================================================================

/// How a subject changed between two manifests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// The subject is new.
    Addition,
    /// The subject is gone.
    Removal,
    /// The new range admits versions the old one did not.
    RangeWiden,
    /// The new range admits a strict subset of the old one.
    RangeNarrow,
    /// The pinned version went up.
    VersionBump,
    /// The pinned version went down.
    VersionDowngrade,
}

/// One classified difference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// What changed.
    pub subject: Subject,
    /// How it changed.
    pub kind: ChangeKind,
    /// The old constraint or version.
    pub before: Option<String>,
    /// The new constraint or version.
    pub after: Option<String>,
}

/// A manifest change that may not be applied as is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralDiffError {
    /// Frozen-phase changes that need the operator's confirmation.
    #[error("{} change(s) need confirmation in a frozen phase:{}", .changes.len(), ChangeList(.changes))]
    NeedsConfirmation {
        /// The changes that were flagged.
        changes: Vec<Change>,
    },
    /// A generated file no longer matches its recorded digest.
    #[error("{} was edited by hand since it was generated", .path.display())]
    ManualEdit {
        /// The edited file.
        path: PathBuf,
    },
}

struct ChangeList<'a>(&'a [Change]);

//================================================================================================
// Impls
//================================================================================================

impl ChangeKind {
    /// Whether a frozen release needs confirmation before applying this change.
    pub fn needs_confirmation(self) -> bool {
        matches!(
            self,
            ChangeKind::Removal | ChangeKind::VersionDowngrade | ChangeKind::RangeWiden
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Addition => "addition",
            ChangeKind::Removal => "removal",
            ChangeKind::RangeWiden => "range-widen",
            ChangeKind::RangeNarrow => "range-narrow",
            ChangeKind::VersionBump => "version-bump",
            ChangeKind::VersionDowngrade => "version-downgrade",
        })
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.kind)?;
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => write!(f, " ({before} -> {after})"),
            (Some(before), None) => write!(f, " (was {before})"),
            (None, Some(after)) => write!(f, " ({after})"),
            (None, None) => Ok(()),
        }
    }
}

impl fmt::Display for ChangeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in self.0 {
            write!(f, "\n  - {change}")?;
        }
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Classifies the differences between two build files.
///
/// A range that neither contains nor is contained by its predecessor counts as
/// a widen. Turning prereleases on widens, turning them off narrows.
pub fn diff_constraints(old: &ConstraintManifest, new: &ConstraintManifest) -> Vec<Change> {
    let mut changes = Vec::new();
    if let Some(kind) = classify(&old.core, &new.core) {
        changes.push(Change {
            subject: Subject::Core,
            kind,
            before: Some(old.core.to_string()),
            after: Some(new.core.to_string()),
        });
    }
    changes.extend(diff_maps(&old.packages, &new.packages, classify));
    changes
}

/// Classifies the differences between two deps files.
pub fn diff_pinned(old: &PinnedManifest, new: &PinnedManifest) -> Vec<Change> {
    let mut changes = Vec::new();
    if old.core != new.core {
        changes.push(Change {
            subject: Subject::Core,
            kind: if new.core > old.core {
                ChangeKind::VersionBump
            } else {
                ChangeKind::VersionDowngrade
            },
            before: Some(old.core.to_string()),
            after: Some(new.core.to_string()),
        });
    }
    changes.extend(diff_maps(&old.packages, &new.packages, |a, b| {
        (a != b).then(|| {
            if b > a {
                ChangeKind::VersionBump
            } else {
                ChangeKind::VersionDowngrade
            }
        })
    }));
    changes
}

/// Checks whether `changes` may be applied in `phase`.
///
/// Outside frozen phases everything passes. In frozen phases removals,
/// downgrades and widened ranges are refused unless `confirm` is set, in which
/// case each of them is logged.
pub fn gate(
    changes: &[Change],
    phase: ReleasePhase,
    confirm: bool,
) -> Result<(), StructuralDiffError> {
    if !phase.is_frozen() {
        return Ok(());
    }
    let flagged: Vec<Change> = changes
        .iter()
        .filter(|c| c.kind.needs_confirmation())
        .cloned()
        .collect();
    if flagged.is_empty() {
        return Ok(());
    }
    if !confirm {
        return Err(StructuralDiffError::NeedsConfirmation { changes: flagged });
    }
    for change in &flagged {
        tracing::warn!(
            subject = %change.subject,
            kind = %change.kind,
            before = change.before.as_deref().unwrap_or("-"),
            after = change.after.as_deref().unwrap_or("-"),
            %phase,
            "applying confirmed change to a frozen release"
        );
    }
    Ok(())
}

fn classify(old: &VersionConstraint, new: &VersionConstraint) -> Option<ChangeKind> {
    if old == new {
        return None;
    }
    let range_widened = old.range != new.range && !old.range.covers(&new.range);
    let prerelease_enabled = new.allow_prerelease && !old.allow_prerelease;
    if range_widened || prerelease_enabled {
        Some(ChangeKind::RangeWiden)
    } else {
        Some(ChangeKind::RangeNarrow)
    }
}

fn diff_maps<V: fmt::Display>(
    old: &BTreeMap<PackageName, V>,
    new: &BTreeMap<PackageName, V>,
    classify: impl Fn(&V, &V) -> Option<ChangeKind>,
) -> Vec<Change> {
    let names: BTreeSet<&PackageName> = old.keys().chain(new.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| {
            let (before, after) = (old.get(name), new.get(name));
            let kind = match (before, after) {
                (None, Some(_)) => ChangeKind::Addition,
                (Some(_), None) => ChangeKind::Removal,
                (Some(a), Some(b)) => classify(a, b)?,
                (None, None) => return None,
            };
            Some(Change {
                subject: Subject::Package(name.clone()),
                kind,
                before: before.map(ToString::to_string),
                after: after.map(ToString::to_string),
            })
        })
        .collect()
}
