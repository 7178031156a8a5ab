//! # Version Catalog
//!
//! A catalog is the snapshot a single resolution run observes. It is assembled
//! by [`crate::fetch::Scheduler`] from the results of independent fetch tasks and
//! is read-only afterwards: nothing outside this crate can insert into it, and
//! nothing inside mutates it once the batch has returned.
//!
//! Every package slot records one of three outcomes, so a package that failed
//! to fetch can never be mistaken for one that has no releases.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::index::FetchError;
use crate::name::PackageName;
use crate::version::ReleaseId;

//================================================================================================
// Types
//================================================================================================

/// The outcome of fetching one catalog slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogEntry<V> {
    /// Published versions, highest first.
    Available(Vec<V>),
    /// The index knows the package but lists no versions.
    NoVersionsFound,
    /// Every attempt to fetch the slot failed.
    FetchFailed(FetchError),
}

/// A release of the core runtime, as listed on the core index.
///
/// Ordering follows `version`; the field order matters for the derive.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoreRelease {
    /// The release identifier.
    pub version: ReleaseId,
    /// The runtime-language requirement declared by this release, if any.
    pub requires_runtime: Option<String>,
}

/// The per-run snapshot of the remote indices.
#[derive(Clone, Debug, Default)]
pub struct VersionCatalog {
    packages: BTreeMap<PackageName, CatalogEntry<Version>>,
    core: Option<CatalogEntry<CoreRelease>>,
}

/// Whether a manifest path is a regular file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
}

/// One entry of an artifact's file manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// The path relative to the artifact root.
    #[serde(rename = "name")]
    pub path: String,
    /// Whether the entry is a file or directory.
    #[serde(rename = "ftype")]
    pub kind: FileKind,
    /// The hex encoded sha256 of the file contents, when recorded.
    #[serde(rename = "chksum_sha256", default)]
    pub sha256: Option<String>,
}

//================================================================================================
// Impls
//================================================================================================

impl<V: Ord> CatalogEntry<V> {
    /// Folds a fetch result into a slot, sorting versions highest first.
    pub(crate) fn from_fetch(result: Result<Vec<V>, FetchError>) -> Self {
        match result {
            Ok(versions) if versions.is_empty() => CatalogEntry::NoVersionsFound,
            Ok(mut versions) => {
                versions.sort_by(|a, b| b.cmp(a));
                versions.dedup();
                CatalogEntry::Available(versions)
            },
            Err(e) => CatalogEntry::FetchFailed(e),
        }
    }

    /// The available versions, empty unless the slot is [`CatalogEntry::Available`].
    pub fn versions(&self) -> &[V] {
        match self {
            CatalogEntry::Available(v) => v,
            _ => &[],
        }
    }

    /// The fetch failure recorded for this slot, if any.
    pub fn failure(&self) -> Option<&FetchError> {
        match self {
            CatalogEntry::FetchFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl VersionCatalog {
    pub(crate) fn insert(&mut self, name: PackageName, entry: CatalogEntry<Version>) {
        self.packages.insert(name, entry);
    }

    pub(crate) fn set_core(&mut self, entry: CatalogEntry<CoreRelease>) {
        self.core = Some(entry);
    }

    /// The slot for a package, if it was part of the batch.
    pub fn get(&self, name: &PackageName) -> Option<&CatalogEntry<Version>> {
        self.packages.get(name)
    }

    /// The core runtime slot, if it was part of the batch.
    pub fn core(&self) -> Option<&CatalogEntry<CoreRelease>> {
        self.core.as_ref()
    }

    /// All package slots in name order.
    pub fn packages(&self) -> impl Iterator<Item = (&PackageName, &CatalogEntry<Version>)> {
        self.packages.iter()
    }

    /// The number of package slots.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the catalog holds no package slots.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every failed slot, core first.
    pub fn failures(&self) -> impl Iterator<Item = &FetchError> {
        self.core
            .iter()
            .filter_map(CatalogEntry::failure)
            .chain(self.packages.values().filter_map(CatalogEntry::failure))
    }
}
