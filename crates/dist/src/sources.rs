//! The per-package source repository map.
//!
//! ```toml
//! [packages."community.general"]
//! repository = "https://github.com/ansible-collections/community.general"
//!
//! [packages."ansible.netcommon"]
//! repository = "https://github.com/ansible-collections/ansible.netcommon"
//! directory = "collection"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::manifest::ManifestError;
use crate::name::PackageName;

/// Where the sources of each member package live.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMap {
    #[serde(default)]
    packages: BTreeMap<PackageName, Source>,
}

/// The upstream repository of one package.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// Any url `gix` can fetch from.
    pub repository: String,
    /// The subdirectory of the repository the package is built from.
    #[serde(default)]
    pub directory: Option<String>,
}

impl SourceMap {
    /// Loads a source map.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        Ok(toml_edit::de::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// The source of `name`, if one is configured.
    pub fn get(&self, name: &PackageName) -> Option<&Source> {
        self.packages.get(name)
    }

    /// Adds or replaces the source of `name`.
    pub fn insert(&mut self, name: PackageName, source: Source) {
        self.packages.insert(name, source);
    }
}
