use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::{ManifestError, PinnedManifest, write_atomic};
use crate::name::PackageName;
use crate::version::{ReleaseId, VersionConstraint, VersionRange};

//================================================================================================
// Types
//================================================================================================

/// The build file of a major track.
///
/// ```toml
/// track = 8
/// runtime = ">=3.9"
/// core = "2.15.0"
///
/// [packages]
/// "community.general" = ">=7.0.0,<8.0.0"
/// "community.crypto" = { range = ">=2.14.0,<3.0.0", prerelease = true }
/// ```
///
/// A bare core version such as `2.15.0` stands for its bugfix window,
/// `>=2.15.0,<2.16.0a0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintManifest {
    /// The major track the file governs.
    pub track: u64,
    /// The constraint on the core runtime.
    pub core: VersionConstraint,
    /// The runtime-language requirement, when it is not taken from the core release.
    pub runtime: Option<String>,
    /// The per-package constraints.
    pub packages: BTreeMap<PackageName, VersionConstraint>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    track: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime: Option<String>,
    core: RawConstraint,
    #[serde(default)]
    packages: BTreeMap<String, RawConstraint>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawConstraint {
    Range(String),
    Detailed(DetailedConstraint),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetailedConstraint {
    range: String,
    #[serde(default)]
    prerelease: bool,
}

//================================================================================================
// Impls
//================================================================================================

impl ConstraintManifest {
    /// An empty manifest for `track`.
    pub fn new(track: u64, core: VersionConstraint, runtime: Option<String>) -> Self {
        ConstraintManifest {
            track,
            core,
            runtime,
            packages: BTreeMap::new(),
        }
    }

    /// Loads and validates a build file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Serializes the manifest as TOML.
    pub fn render(&self) -> Result<String, ManifestError> {
        let raw = RawManifest {
            track: self.track,
            runtime: self.runtime.clone(),
            core: RawConstraint::from(&self.core),
            packages: self
                .packages
                .iter()
                .map(|(name, c)| (name.to_string(), RawConstraint::from(c)))
                .collect(),
        };
        Ok(toml_edit::ser::to_string_pretty(&raw)?)
    }

    /// Atomically writes the manifest to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        write_atomic(path.as_ref(), &self.render()?)
    }

    /// The manifest with every range narrowed for a feature freeze.
    ///
    /// Each range is anchored at the version pinned by `prior`, or at its own
    /// lower bound when nothing was pinned yet.
    pub fn feature_frozen(&self, prior: Option<&PinnedManifest>) -> ConstraintManifest {
        ConstraintManifest {
            track: self.track,
            core: freeze(&self.core, prior.map(|p| p.core.as_version())),
            runtime: self.runtime.clone(),
            packages: self
                .packages
                .iter()
                .map(|(name, c)| {
                    let anchor = prior.and_then(|p| p.packages.get(name));
                    (name.clone(), freeze(c, anchor))
                })
                .collect(),
        }
    }
}

impl FromStr for ConstraintManifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawManifest = toml_edit::de::from_str(s)?;

        let core = match &raw.core {
            RawConstraint::Range(text) => match text.trim().parse::<ReleaseId>() {
                Ok(release) => {
                    VersionConstraint::new(VersionRange::bugfix_window(release.as_version().clone()))
                },
                Err(_) => raw.core.to_constraint("core")?,
            },
            RawConstraint::Detailed(_) => raw.core.to_constraint("core")?,
        };

        let mut packages = BTreeMap::new();
        for (key, constraint) in &raw.packages {
            let name: PackageName = key.parse()?;
            let constraint = constraint.to_constraint(key)?;
            if packages.insert(name.clone(), constraint).is_some() {
                return Err(ManifestError::Duplicate(name.to_string()));
            }
        }

        Ok(ConstraintManifest {
            track: raw.track,
            core,
            runtime: raw.runtime,
            packages,
        })
    }
}

impl RawConstraint {
    fn to_constraint(&self, key: &str) -> Result<VersionConstraint, ManifestError> {
        let (range, prerelease) = match self {
            RawConstraint::Range(range) => (range, false),
            RawConstraint::Detailed(d) => (&d.range, d.prerelease),
        };
        let range = range.parse().map_err(|source| ManifestError::Range {
            key: key.to_owned(),
            source,
        })?;
        Ok(VersionConstraint::new(range).with_prerelease(prerelease))
    }
}

impl From<&VersionConstraint> for RawConstraint {
    fn from(c: &VersionConstraint) -> Self {
        if c.allow_prerelease {
            RawConstraint::Detailed(DetailedConstraint {
                range: c.range.to_string(),
                prerelease: true,
            })
        } else {
            RawConstraint::Range(c.range.to_string())
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

fn freeze(constraint: &VersionConstraint, anchor: Option<&Version>) -> VersionConstraint {
    let anchor = anchor.unwrap_or(constraint.range.lower());
    VersionConstraint {
        range: constraint.range.feature_freeze(anchor),
        allow_prerelease: constraint.allow_prerelease,
    }
}
