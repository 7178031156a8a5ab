//! Package naming.
//!
//! Member packages are addressed as `<namespace>.<name>`. Names compare
//! case-insensitively, so they are folded to lowercase once at the parse
//! boundary and every later comparison is a plain string comparison.

use std::fmt;
use std::str::FromStr;

use lazy_regex::{Lazy, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//================================================================================================
// Statics
//================================================================================================

static NAME_REGEX: Lazy<Regex> =
    lazy_regex::lazy_regex!(r"^(?P<namespace>[a-z0-9][a-z0-9_]*)\.(?P<name>[a-z0-9][a-z0-9_]*)$");

//================================================================================================
// Types
//================================================================================================

/// The case-folded identifier of a member package.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

/// Errors raised when a package name does not follow `<namespace>.<name>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name is empty or consists only of whitespace.
    #[error("package names cannot be empty")]
    Empty,
    /// The name does not match `<namespace>.<name>`.
    #[error("invalid package name `{0}`, expected `<namespace>.<name>`")]
    Invalid(String),
}

/// The thing a resolution outcome or manifest change refers to.
///
/// `Core` sorts before every package, so reports list the runtime first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// The distinguished core runtime entry.
    Core,
    /// A member package.
    Package(PackageName),
}

//================================================================================================
// Impls
//================================================================================================

impl PackageName {
    /// The part before the dot.
    pub fn namespace(&self) -> &str {
        self.0.split_once('.').map(|(ns, _)| ns).unwrap_or_default()
    }

    /// The part after the dot.
    pub fn name(&self) -> &str {
        self.0.split_once('.').map(|(_, n)| n).unwrap_or_default()
    }

    /// The full, folded name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        let folded = trimmed.to_lowercase();
        if NAME_REGEX.is_match(&folded) {
            Ok(PackageName(folded))
        } else {
            Err(NameError::Invalid(trimmed.to_owned()))
        }
    }
}

impl TryFrom<String> for PackageName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&str> for PackageName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PackageName> for String {
    fn from(value: PackageName) -> Self {
        value.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Core => f.write_str("core"),
            Subject::Package(name) => name.fmt(f),
        }
    }
}

impl From<PackageName> for Subject {
    fn from(value: PackageName) -> Self {
        Subject::Package(value)
    }
}

//================================================================================================
// Tests
//================================================================================================
