use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{GENERATED_HEADER, ManifestError, write_atomic};
use crate::name::PackageName;
use crate::version::ReleaseId;

//================================================================================================
// Constants
//================================================================================================

const DIGEST_PREFIX: &str = "# sha256:";

//================================================================================================
// Types
//================================================================================================

/// The deps file of one release: exactly what was resolved.
///
/// Rendered files carry a `# sha256:` line over the TOML body, so a later
/// run can tell whether the file was edited by hand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinnedManifest {
    /// The release the file pins.
    pub release: ReleaseId,
    /// The pinned core runtime release.
    pub core: ReleaseId,
    /// The runtime-language requirement.
    pub runtime: String,
    /// The pinned version of every member package.
    pub packages: BTreeMap<PackageName, Version>,
}

/// The result of checking a deps file against its recorded digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestStatus {
    /// The body matches the digest.
    Intact,
    /// The body was changed after it was written.
    Edited,
    /// The file carries no digest line.
    Missing,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPinned {
    release: ReleaseId,
    core: ReleaseId,
    runtime: String,
    #[serde(default)]
    packages: BTreeMap<String, String>,
}

//================================================================================================
// Impls
//================================================================================================

impl DigestStatus {
    /// Whether the file is exactly as it was generated.
    pub fn is_intact(self) -> bool {
        matches!(self, DigestStatus::Intact)
    }
}

impl PinnedManifest {
    /// Loads a deps file without checking its digest.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        std::fs::read_to_string(path)?.parse()
    }

    /// Loads a deps file and reports whether it was edited by hand.
    pub fn read_checked(path: impl AsRef<Path>) -> Result<(Self, DigestStatus), ManifestError> {
        Self::parse_checked(&std::fs::read_to_string(path)?)
    }

    /// Parses a deps file and checks its body against the recorded digest.
    pub fn parse_checked(content: &str) -> Result<(Self, DigestStatus), ManifestError> {
        let manifest = content.parse()?;
        let status = match split_digest(content) {
            None => DigestStatus::Missing,
            Some((digest, body)) if digest == hex_digest(body) => DigestStatus::Intact,
            Some(_) => DigestStatus::Edited,
        };
        Ok((manifest, status))
    }

    /// Renders the file: generated header, digest line, then the TOML body.
    pub fn render(&self) -> Result<String, ManifestError> {
        let raw = RawPinned {
            release: self.release.clone(),
            core: self.core.clone(),
            runtime: self.runtime.clone(),
            packages: self
                .packages
                .iter()
                .map(|(name, v)| (name.to_string(), v.to_string()))
                .collect(),
        };
        let body = toml_edit::ser::to_string_pretty(&raw)?;
        Ok(format!(
            "{GENERATED_HEADER}{DIGEST_PREFIX} {}\n{body}",
            hex_digest(&body)
        ))
    }

    /// Atomically writes the file to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        write_atomic(path.as_ref(), &self.render()?)
    }
}

impl FromStr for PinnedManifest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawPinned = toml_edit::de::from_str(s)?;

        let mut packages = BTreeMap::new();
        for (key, value) in raw.packages {
            let name: PackageName = key.parse()?;
            let version = Version::parse(value.trim()).map_err(|_| ManifestError::Version {
                key: key.clone(),
                value: value.clone(),
            })?;
            if packages.insert(name.clone(), version).is_some() {
                return Err(ManifestError::Duplicate(name.to_string()));
            }
        }

        Ok(PinnedManifest {
            release: raw.release,
            core: raw.core,
            runtime: raw.runtime,
            packages,
        })
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Splits a rendered file into its recorded digest and the body the digest covers.
fn split_digest(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if !line.starts_with('#') {
            return None;
        }
        offset += line.len();
        if let Some(digest) = line.strip_prefix(DIGEST_PREFIX) {
            return Some((digest.trim(), &content[offset..]));
        }
    }
    None
}

fn hex_digest(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}
