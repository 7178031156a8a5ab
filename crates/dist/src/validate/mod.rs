//! # Tag/Artifact Validator
//!
//! Certifies a pinned manifest after the fact: for every pinned package, the
//! published artifact's file manifest is compared with the tree of the
//! source-control tag carrying the same version.
//!
//! Both sides are reached through traits. [`ArtifactSource`] is implemented by
//! the fetch [`Scheduler`], so artifact manifests go through the same retrying
//! metadata client as version lookups. [`TagSource`] is implemented by
//! [`git::GitTags`].
//!
//! The validator never writes anything. Every problem it finds is a
//! [`ValidationMismatch`] in the returned report rather than an error.

pub mod git;

#[cfg(test)]
mod test;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use semver::Version;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use self::git::{GitTags, TagError};
use crate::catalog::{FileEntry, FileKind};
use crate::fetch::Scheduler;
use crate::index::{FetchError, QueryIndex};
use crate::manifest::PinnedManifest;
use crate::name::PackageName;
use crate::sources::{Source, SourceMap};

//================================================================================================
// Types
//================================================================================================

/// What disagrees between an artifact and its tag.
///
/// Variants are declared in report order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum MismatchKind {
    /// No usable tag matches the pinned version.
    TagNotFound(String),
    /// The artifact file manifest could not be fetched.
    ArtifactUnavailable(String),
    /// The tag has a file the artifact lacks.
    MissingFromArtifact(String),
    /// The artifact has a file the tag lacks.
    MissingFromTag(String),
    /// Both sides have the file, with different contents.
    ChecksumMismatch(String),
}

/// One entry of a [`ValidationReport`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ValidationMismatch {
    /// The package the mismatch was found in.
    pub package: PackageName,
    /// Its pinned version.
    pub version: Version,
    /// What disagrees.
    pub kind: MismatchKind,
}

/// The outcome of validating one pinned manifest. Empty means pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationReport {
    mismatches: Vec<ValidationMismatch>,
}

/// A file recorded in a tag's tree.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeFile {
    /// The path relative to the package directory, `/` separated.
    pub path: String,
    /// The hex encoded sha256 of the contents, when they were read.
    pub sha256: Option<String>,
}

/// Cross-checks pinned packages against their tagged sources.
#[derive(Debug)]
pub struct Validator<A, T> {
    artifacts: Arc<A>,
    tags: Arc<T>,
    sources: Arc<SourceMap>,
    concurrency: usize,
}

//================================================================================================
// Traits
//================================================================================================

/// Where artifact file manifests come from.
pub trait ArtifactSource: Send + Sync + 'static {
    /// The file manifest of `name` at `version`.
    fn artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> impl Future<Output = Result<Vec<FileEntry>, FetchError>> + Send;
}

/// Read access to the tags of source repositories.
pub trait TagSource: Send + Sync + 'static {
    /// The names of every tag in `repository`, without the `refs/tags/` prefix.
    fn list_tags(
        &self,
        repository: &str,
    ) -> impl Future<Output = Result<Vec<String>, TagError>> + Send;

    /// The files of `tag`, relative to `directory` when one is given.
    fn tree(
        &self,
        repository: &str,
        tag: &str,
        directory: Option<&str>,
    ) -> impl Future<Output = Result<Vec<TreeFile>, TagError>> + Send;
}

//================================================================================================
// Impls
//================================================================================================

impl MismatchKind {
    /// The stable snake_case code of this kind.
    pub fn code(&self) -> &'static str {
        match self {
            MismatchKind::TagNotFound(_) => "tag_not_found",
            MismatchKind::ArtifactUnavailable(_) => "artifact_unavailable",
            MismatchKind::MissingFromArtifact(_) => "missing_from_artifact",
            MismatchKind::MissingFromTag(_) => "missing_from_tag",
            MismatchKind::ChecksumMismatch(_) => "checksum_mismatch",
        }
    }

    fn detail(&self) -> &str {
        match self {
            MismatchKind::TagNotFound(s)
            | MismatchKind::ArtifactUnavailable(s)
            | MismatchKind::MissingFromArtifact(s)
            | MismatchKind::MissingFromTag(s)
            | MismatchKind::ChecksumMismatch(s) => s,
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code(), self.detail())
    }
}

impl fmt::Display for ValidationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.package, self.version, self.kind)
    }
}

impl ValidationReport {
    /// Builds a report, putting the mismatches in report order.
    pub fn new(mut mismatches: Vec<ValidationMismatch>) -> Self {
        mismatches.sort();
        mismatches.dedup();
        ValidationReport { mismatches }
    }

    /// Whether nothing disagreed.
    pub fn is_pass(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// The mismatches in report order.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationMismatch> {
        self.mismatches.iter()
    }

    /// The number of mismatches.
    pub fn len(&self) -> usize {
        self.mismatches.len()
    }

    /// Same as [`ValidationReport::is_pass`].
    pub fn is_empty(&self) -> bool {
        self.is_pass()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for mismatch in &self.mismatches {
            writeln!(f, "{mismatch}")?;
        }
        Ok(())
    }
}

impl<I: QueryIndex> ArtifactSource for Scheduler<I> {
    async fn artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<FileEntry>, FetchError> {
        let ctx = self.context(&CancellationToken::new());
        let timeout = ctx.policy.task_timeout;
        crate::fetch::bounded(
            timeout,
            name.as_str(),
            self.client().fetch_artifact_files(name, version, &ctx),
        )
        .await
    }
}

impl<A: ArtifactSource, T: TagSource> Validator<A, T> {
    /// A validator running at most `concurrency` package checks at once.
    pub fn new(artifacts: Arc<A>, tags: Arc<T>, sources: SourceMap, concurrency: usize) -> Self {
        Validator {
            artifacts,
            tags,
            sources: Arc::new(sources),
            concurrency: concurrency.max(1),
        }
    }

    /// Checks every package of `pinned` and collects what disagrees.
    pub async fn validate(&self, pinned: &PinnedManifest) -> ValidationReport {
        let span = crate::log::batch_span(
            "validate",
            "comparing artifacts with tags",
            pinned.packages.len(),
        );

        async move {
            let permits = Arc::new(Semaphore::new(self.concurrency));
            let mut tasks = JoinSet::new();

            for (name, version) in &pinned.packages {
                let artifacts = Arc::clone(&self.artifacts);
                let tags = Arc::clone(&self.tags);
                let permits = Arc::clone(&permits);
                let source = self.sources.get(name).cloned();
                let (name, version) = (name.to_owned(), version.to_owned());
                let span = crate::log::package_span("validating", name.as_str());

                tasks.spawn(
                    async move {
                        let _permit = permits.acquire().await;
                        let kinds =
                            check_package(&*artifacts, &*tags, source.as_ref(), &name, &version)
                                .await;
                        kinds
                            .into_iter()
                            .map(|kind| ValidationMismatch {
                                package: name.clone(),
                                version: version.clone(),
                                kind,
                            })
                            .collect::<Vec<_>>()
                    }
                    .instrument(span),
                );
            }

            let mut mismatches = Vec::new();
            while let Some(res) = tasks.join_next().await {
                match res {
                    Ok(found) => mismatches.extend(found),
                    Err(e) => tracing::error!(error = %e, "validation task did not complete"),
                }
                crate::log::tick();
            }

            let report = ValidationReport::new(mismatches);
            tracing::info!(
                release = %pinned.release,
                packages = pinned.packages.len(),
                mismatches = report.len(),
                "validation finished"
            );
            report
        }
        .instrument(span)
        .await
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Strips a single leading `v` from a tag name.
pub fn normalize_tag(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// The first tag naming `version`, once normalized.
pub fn matching_tag<'a>(tags: &'a [String], version: &Version) -> Option<&'a str> {
    let wanted = version.to_string();
    tags.iter()
        .map(String::as_str)
        .find(|tag| normalize_tag(tag) == wanted)
}

async fn check_package<A: ArtifactSource, T: TagSource>(
    artifacts: &A,
    tags: &T,
    source: Option<&Source>,
    name: &PackageName,
    version: &Version,
) -> Vec<MismatchKind> {
    let (files, tree) = tokio::join!(
        artifacts.artifact_files(name, version),
        tagged_tree(tags, source, version)
    );

    match (files, tree) {
        (Ok(files), Ok(tree)) => compare(&files, &tree),
        (files, tree) => {
            let mut kinds = Vec::new();
            if let Err(e) = files {
                tracing::warn!(package = %name, error = %e, "artifact manifest unavailable");
                kinds.push(MismatchKind::ArtifactUnavailable(e.to_string()));
            }
            if let Err(reason) = tree {
                tracing::warn!(package = %name, %reason, "no usable tag");
                kinds.push(MismatchKind::TagNotFound(reason));
            }
            kinds
        },
    }
}

async fn tagged_tree<T: TagSource>(
    tags: &T,
    source: Option<&Source>,
    version: &Version,
) -> Result<Vec<TreeFile>, String> {
    let Some(source) = source else {
        return Err("no source repository configured".into());
    };
    let listed = tags
        .list_tags(&source.repository)
        .await
        .map_err(|e| format!("listing tags of {} failed: {e}", source.repository))?;
    let Some(tag) = matching_tag(&listed, version) else {
        return Err(format!("{} has no tag for {version}", source.repository));
    };
    tracing::debug!(%tag, repository = %source.repository, "found matching tag");
    tags.tree(&source.repository, tag, source.directory.as_deref())
        .await
        .map_err(|e| format!("reading tag {tag} of {} failed: {e}", source.repository))
}

/// Compares the regular files of an artifact with the files of a tag.
fn compare(files: &[FileEntry], tree: &[TreeFile]) -> Vec<MismatchKind> {
    let artifact: BTreeMap<&str, Option<&str>> = files
        .iter()
        .filter(|f| f.kind == FileKind::File)
        .map(|f| (f.path.as_str(), f.sha256.as_deref()))
        .collect();
    let tagged: BTreeMap<&str, Option<&str>> = tree
        .iter()
        .map(|f| (f.path.as_str(), f.sha256.as_deref()))
        .collect();

    let mut kinds = Vec::new();
    for (path, tag_sum) in &tagged {
        match artifact.get(path) {
            None => kinds.push(MismatchKind::MissingFromArtifact((*path).to_owned())),
            Some(artifact_sum) => {
                if let (Some(a), Some(b)) = (tag_sum, artifact_sum)
                    && !a.eq_ignore_ascii_case(b)
                {
                    kinds.push(MismatchKind::ChecksumMismatch((*path).to_owned()));
                }
            },
        }
    }
    kinds.extend(
        artifact
            .keys()
            .filter(|path| !tagged.contains_key(*path))
            .map(|path| MismatchKind::MissingFromTag((*path).to_owned())),
    );
    kinds
}
