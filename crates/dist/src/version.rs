//! # Versions and Ranges
//!
//! Member packages publish plain semantic versions. Releases of the distribution
//! itself, and of the core runtime, use the compact `MAJOR.MINOR.PATCH[(a|b|rc)N]`
//! grammar instead. [`ReleaseId`] stores those as semantic versions with a dotted
//! prerelease (`a.1`, `rc.10`), so `8.0.0rc10` correctly sorts after `8.0.0rc2`
//! and every prerelease sorts below its final counterpart.
//!
//! [`VersionRange`] is deliberately simpler than a general requirement language:
//! an inclusive lower bound, an optional upper bound, or a single exact pin.
//! Whether prereleases are eligible is not a property of the range; see
//! [`VersionConstraint`].

use std::fmt;
use std::str::FromStr;

use lazy_regex::{Lazy, Regex};
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;


//================================================================================================
// Statics
//================================================================================================

static RELEASE_REGEX: Lazy<Regex> = lazy_regex::lazy_regex!(
    r"^(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)(?:(?P<kind>a|b|rc)(?P<serial>0|[1-9]\d*))?$"
);

//================================================================================================
// Types
//================================================================================================

/// The kind of a release identifier's prerelease suffix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreKind {
    /// `aN`
    Alpha,
    /// `bN`
    Beta,
    /// `rcN`
    Rc,
}

/// A release identifier of the form `MAJOR.MINOR.PATCH[(a|b|rc)N]`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseId {
    version: Version,
    pre: Option<(PreKind, u64)>,
}

/// Raised when a string does not follow the release identifier grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid release identifier `{0}`, expected MAJOR.MINOR.PATCH[(a|b|rc)N]")]
pub struct ReleaseIdError(String);

/// The upper end of a [`VersionRange`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Upper {
    /// `<X`
    Below(Version),
    /// `<=X`
    AtMost(Version),
}

/// A contiguous interval of semantic versions with an inclusive lower bound.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    lower: Version,
    upper: Option<Upper>,
}

/// Errors raised while parsing a range expression such as `>=1.2.0,<2.0.0`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// The expression, or one of its clauses, is empty.
    #[error("empty clause in range `{0}`")]
    Empty(String),
    /// More than one `>=` clause.
    #[error("more than one lower bound in `{0}`")]
    MultipleLower(String),
    /// More than one `<` or `<=` clause.
    #[error("more than one upper bound in `{0}`")]
    MultipleUpper(String),
    /// A `>` clause; lower bounds must be inclusive.
    #[error("strict lower bound `{0}` is not supported, use `>=`")]
    StrictLower(String),
    /// No `>=` clause.
    #[error("range `{0}` has no lower bound")]
    MissingLower(String),
    /// `==` mixed with other clauses.
    #[error("exact pin in `{0}` cannot be combined with other clauses")]
    ExactWithOthers(String),
    /// A clause with an operator that is not understood.
    #[error("unsupported clause `{0}`")]
    Unsupported(String),
    /// A clause whose version could not be parsed.
    #[error("invalid version `{value}`: {reason}")]
    InvalidVersion {
        /// The offending text.
        value: String,
        /// Why the parser rejected it.
        reason: String,
    },
    /// The bounds admit no version at all.
    #[error("range `{0}` is empty")]
    EmptyInterval(String),
}

/// The version range a package may be resolved within, plus its prerelease policy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    /// The admissible interval.
    pub range: VersionRange,
    /// Whether prereleases are eligible regardless of the release phase.
    pub allow_prerelease: bool,
}

//================================================================================================
// Impls
//================================================================================================

impl PreKind {
    fn tag(self) -> &'static str {
        match self {
            PreKind::Alpha => "a",
            PreKind::Beta => "b",
            PreKind::Rc => "rc",
        }
    }
}

impl ReleaseId {
    /// A final release `major.minor.patch`.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        ReleaseId {
            version: Version::new(major, minor, patch),
            pre: None,
        }
    }

    /// The major component, which names the release track.
    pub fn major(&self) -> u64 {
        self.version.major
    }

    /// The minor component.
    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    /// The patch component.
    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    /// The prerelease suffix, if any.
    pub fn prerelease(&self) -> Option<(PreKind, u64)> {
        self.pre
    }

    /// Whether this identifier carries a prerelease suffix.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// The semantic version this identifier sorts as.
    pub fn as_version(&self) -> &Version {
        &self.version
    }
}

impl FromStr for ReleaseId {
    type Err = ReleaseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReleaseIdError(s.to_owned());
        let caps = RELEASE_REGEX.captures(s.trim()).ok_or_else(invalid)?;
        let number = |key: &str| -> Result<u64, ReleaseIdError> {
            caps.name(key)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(invalid)
        };
        let mut version = Version::new(number("major")?, number("minor")?, number("patch")?);

        let pre = match caps.name("kind").map(|m| m.as_str()) {
            Some(kind) => {
                let kind = match kind {
                    "a" => PreKind::Alpha,
                    "b" => PreKind::Beta,
                    _ => PreKind::Rc,
                };
                let serial = number("serial")?;
                version.pre = Prerelease::new(&format!("{}.{}", kind.tag(), serial))
                    .map_err(|_| invalid())?;
                Some((kind, serial))
            },
            None => None,
        };
        version.build = BuildMetadata::EMPTY;

        Ok(ReleaseId { version, pre })
    }
}

impl TryFrom<String> for ReleaseId {
    type Error = ReleaseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReleaseId> for String {
    fn from(value: ReleaseId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Version {
            major,
            minor,
            patch,
            ..
        } = &self.version;
        write!(f, "{major}.{minor}.{patch}")?;
        if let Some((kind, serial)) = self.pre {
            write!(f, "{}{}", kind.tag(), serial)?;
        }
        Ok(())
    }
}

impl VersionRange {
    /// Builds a range from its bounds, rejecting intervals that admit nothing.
    pub fn new(lower: Version, upper: Option<Upper>) -> Result<Self, RangeError> {
        let range = VersionRange { lower, upper };
        let admits_something = match &range.upper {
            None => true,
            Some(Upper::Below(u)) => u > &range.lower,
            Some(Upper::AtMost(u)) => u >= &range.lower,
        };
        if admits_something {
            Ok(range)
        } else {
            Err(RangeError::EmptyInterval(range.to_string()))
        }
    }

    /// `==version`
    pub fn exact(version: Version) -> Self {
        VersionRange {
            upper: Some(Upper::AtMost(version.clone())),
            lower: version,
        }
    }

    /// `>=version` with no upper bound.
    pub fn at_least(version: Version) -> Self {
        VersionRange {
            lower: version,
            upper: None,
        }
    }

    /// The bugfix window of a release: `>=X.Y.Z,<X.(Y+1).0a0`.
    ///
    /// The upper bound sits below the first alpha of the next minor, so no
    /// prerelease of the next feature line can slip in.
    pub fn bugfix_window(version: Version) -> Self {
        let mut upper = Version::new(version.major, version.minor + 1, 0);
        upper.pre = Prerelease::new("a.0").unwrap_or(Prerelease::EMPTY);
        VersionRange {
            lower: version,
            upper: Some(Upper::Below(upper)),
        }
    }

    /// The range a new major track starts with, given the latest published version.
    ///
    /// `X.Y.Z` yields `>=X.Y.0,<(X+1).0.0`. A prerelease of a `.0` patch keeps its
    /// exact lower bound so it remains admissible.
    pub fn major_track(latest: &Version) -> Self {
        let lower = if !latest.pre.is_empty() && latest.patch == 0 {
            latest.clone()
        } else {
            Version::new(latest.major, latest.minor, 0)
        };
        VersionRange {
            lower,
            upper: Some(Upper::Below(Version::new(latest.major + 1, 0, 0))),
        }
    }

    /// The inclusive lower bound.
    pub fn lower(&self) -> &Version {
        &self.lower
    }

    /// The upper bound, if any.
    pub fn upper(&self) -> Option<&Upper> {
        self.upper.as_ref()
    }

    /// Whether the range pins a single version.
    pub fn is_exact(&self) -> bool {
        matches!(&self.upper, Some(Upper::AtMost(u)) if u == &self.lower)
    }

    /// Whether `version` lies inside the interval. Prerelease policy is not applied here.
    pub fn contains(&self, version: &Version) -> bool {
        if version < &self.lower {
            return false;
        }
        match &self.upper {
            None => true,
            Some(Upper::Below(u)) => version < u,
            Some(Upper::AtMost(u)) => version <= u,
        }
    }

    /// Whether every version admitted by `other` is also admitted by `self`.
    pub fn covers(&self, other: &VersionRange) -> bool {
        if self.lower > other.lower {
            return false;
        }
        match (self.upper_key(), other.upper_key()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine >= theirs,
        }
    }

    /// Narrows the range for a feature freeze anchored at `anchor`.
    ///
    /// The upper bound becomes `anchor.major.(anchor.minor + 1).0` when that is
    /// tighter than the current one; the lower bound is kept. Exact pins are
    /// returned unchanged.
    pub fn feature_freeze(&self, anchor: &Version) -> VersionRange {
        if self.is_exact() {
            return self.clone();
        }
        let next = Version::new(anchor.major, anchor.minor + 1, 0);
        let tighter = match &self.upper {
            None => true,
            Some(Upper::Below(u)) => &next < u,
            Some(Upper::AtMost(u)) => &next <= u,
        };
        if tighter && next > self.lower {
            VersionRange {
                lower: self.lower.clone(),
                upper: Some(Upper::Below(next)),
            }
        } else {
            self.clone()
        }
    }

    fn upper_key(&self) -> Option<(&Version, bool)> {
        self.upper.as_ref().map(|u| match u {
            Upper::Below(v) => (v, false),
            Upper::AtMost(v) => (v, true),
        })
    }
}

impl FromStr for VersionRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lower = None;
        let mut upper = None;
        let mut exact = None;
        let mut clauses = 0usize;

        for clause in s.split(',').map(str::trim) {
            if clause.is_empty() {
                return Err(RangeError::Empty(s.to_owned()));
            }
            clauses += 1;
            if let Some(v) = clause.strip_prefix(">=") {
                if lower.replace(parse_bound(v)?).is_some() {
                    return Err(RangeError::MultipleLower(s.to_owned()));
                }
            } else if let Some(v) = clause.strip_prefix("<=") {
                if upper.replace(Upper::AtMost(parse_bound(v)?)).is_some() {
                    return Err(RangeError::MultipleUpper(s.to_owned()));
                }
            } else if let Some(v) = clause.strip_prefix("==") {
                if exact.replace(parse_bound(v)?).is_some() {
                    return Err(RangeError::ExactWithOthers(s.to_owned()));
                }
            } else if clause.starts_with("!=") {
                return Err(RangeError::Unsupported(clause.to_owned()));
            } else if clause.starts_with('>') {
                return Err(RangeError::StrictLower(clause.to_owned()));
            } else if let Some(v) = clause.strip_prefix('<') {
                if upper.replace(Upper::Below(parse_bound(v)?)).is_some() {
                    return Err(RangeError::MultipleUpper(s.to_owned()));
                }
            } else {
                return Err(RangeError::Unsupported(clause.to_owned()));
            }
        }

        if let Some(version) = exact {
            if clauses > 1 {
                return Err(RangeError::ExactWithOthers(s.to_owned()));
            }
            return Ok(VersionRange::exact(version));
        }

        let lower = lower.ok_or_else(|| RangeError::MissingLower(s.to_owned()))?;
        VersionRange::new(lower, upper)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = RangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exact() {
            return write!(f, "=={}", self.lower);
        }
        write!(f, ">={}", self.lower)?;
        match &self.upper {
            Some(Upper::Below(u)) => write!(f, ",<{u}"),
            Some(Upper::AtMost(u)) => write!(f, ",<={u}"),
            None => Ok(()),
        }
    }
}

impl VersionConstraint {
    /// A constraint that does not admit prereleases outside of alpha releases.
    pub fn new(range: VersionRange) -> Self {
        VersionConstraint {
            range,
            allow_prerelease: false,
        }
    }

    /// Sets the per-package prerelease override.
    pub fn with_prerelease(mut self, allow: bool) -> Self {
        self.allow_prerelease = allow;
        self
    }

    /// Whether `version` may be chosen, given whether the phase admits prereleases.
    pub fn admits(&self, version: &Version, phase_admits_prereleases: bool) -> bool {
        self.range.contains(version)
            && (version.pre.is_empty() || phase_admits_prereleases || self.allow_prerelease)
    }
}

impl From<VersionRange> for VersionConstraint {
    fn from(value: VersionRange) -> Self {
        VersionConstraint::new(value)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.range.fmt(f)?;
        if self.allow_prerelease {
            f.write_str(" (prereleases allowed)")?;
        }
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Parses the version of one clause, accepting both the compact release grammar
/// (`2.16.0a0`) and plain semantic versions (`2.16.0-a.0`).
fn parse_bound(text: &str) -> Result<Version, RangeError> {
    let text = text.trim();
    if let Ok(release) = text.parse::<ReleaseId>() {
        return Ok(release.version);
    }
    Version::parse(text).map_err(|e| RangeError::InvalidVersion {
        value: text.to_owned(),
        reason: e.to_string(),
    })
}
