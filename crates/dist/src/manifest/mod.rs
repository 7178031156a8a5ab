//! # Manifests
//!
//! The two on-disk documents a release is made of:
//!
//! - [`ConstraintManifest`], the hand-maintained *build file* of a major track,
//!   declaring the range each member package may resolve within.
//! - [`PinnedManifest`], the generated *deps file* of a single release,
//!   recording exactly what was resolved.
//!
//! Both are TOML, validated when loaded, and always written atomically through
//! a temporary file in the destination directory. The [`diff`] module compares
//! two versions of either document.

pub mod diff;

mod constraint;
mod pinned;

use std::io::Write;
use std::path::{Path, PathBuf};

pub use constraint::ConstraintManifest;
pub use pinned::{DigestStatus, PinnedManifest};
use tempfile::NamedTempFile;

use crate::name::{NameError, PackageName};
use crate::version::RangeError;


//================================================================================================
// Constants
//================================================================================================

/// Prepended to every file this crate generates.
pub const GENERATED_HEADER: &str = concat!(
    "# This file is automatically @generated by curate.\n",
    "# It is not intended for manual editing.\n",
);

//================================================================================================
// Types
//================================================================================================

/// Errors raised while loading or storing a manifest.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The document is not valid TOML, or does not have the expected shape.
    #[error(transparent)]
    Decode(#[from] toml_edit::de::Error),
    /// The manifest could not be serialized.
    #[error(transparent)]
    Encode(#[from] toml_edit::ser::Error),
    /// The temporary file could not be moved into place.
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
    /// A package name is invalid.
    #[error(transparent)]
    Name(#[from] NameError),
    /// The range declared for `key` is invalid.
    #[error("invalid range for `{key}`: {source}")]
    Range {
        /// The package name, or `core`.
        key: String,
        /// The parse failure.
        source: RangeError,
    },
    /// The version recorded for `key` is invalid.
    #[error("invalid version `{value}` for `{key}`")]
    Version {
        /// The package name, `core` or `release`.
        key: String,
        /// The offending text.
        value: String,
    },
    /// Two entries collapse to the same name once case is folded.
    #[error("package `{0}` is declared more than once")]
    Duplicate(String),
    /// The manifest belongs to a different track or release than the file it was read from.
    #[error("{} declares {found}, expected {expected}", .path.display())]
    Mismatch {
        /// The file that was read.
        path: PathBuf,
        /// What the file name implies.
        expected: String,
        /// What the document declares.
        found: String,
    },
}

//================================================================================================
// Functions
//================================================================================================

/// Writes `content` to `path` through a temporary file in the same directory.
///
/// Readers observe either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<(), ManifestError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .map(|n| format!(".{}", n.to_string_lossy()))
        .unwrap_or_else(|| ".curate".into());

    let mut tmp = NamedTempFile::with_prefix_in(prefix, dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    tracing::debug!(path = %path.display(), "wrote file");
    Ok(())
}

/// Parses a pieces file: one package name per line.
///
/// Blank lines and `#` comments are skipped, and repeated names are kept once
/// in order of first appearance.
pub fn parse_pieces(content: &str) -> Result<Vec<PackageName>, NameError> {
    let mut names: Vec<PackageName> = Vec::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let name: PackageName = line.parse()?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}
