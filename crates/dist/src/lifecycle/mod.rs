//! # Manifest Lifecycle
//!
//! Drives a release through its states on disk:
//!
//! ```text
//! Uninitialized --new_release--> Drafted --prepare--> Pinned --rebuild--> Built
//! ```
//!
//! A track is *drafted* once its build file exists, a release is *pinned* once
//! its deps file exists, and *built* once a build plan was produced from it.
//! Every file is written atomically, so a failed or cancelled run leaves the
//! previous state untouched.

mod build;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use build::{ArtifactBuilder, BuildError, BuildPlan, CommandBuilder, PlannedPackage};
use semver::Version;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogEntry;
use crate::fetch::{Cancelled, Scheduler};
use crate::index::{FetchError, QueryIndex};
use crate::manifest::diff::{Change, StructuralDiffError, diff_constraints, diff_pinned, gate};
use crate::manifest::{ConstraintManifest, ManifestError, PinnedManifest, write_atomic};
use crate::name::{PackageName, Subject};
use crate::phase::ReleasePhase;
use crate::resolve::{BlockReason, Blocker, PartialResolution, Pins, ResolutionError, Resolver};
use crate::version::{ReleaseId, VersionConstraint, VersionRange};

#[cfg(test)]
mod test;

//================================================================================================
// Types
//================================================================================================

/// Where the files of every track and release live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

/// How far a release has progressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReleaseState {
    /// The track has no build file.
    Uninitialized,
    /// The build file exists, the release is not pinned.
    Drafted,
    /// The deps file exists.
    Pinned,
    /// A build plan was produced from the deps file.
    Built,
}

/// How the build file of a new track is populated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seed {
    /// No packages yet.
    Empty {
        /// The core runtime constraint.
        core: VersionConstraint,
        /// The runtime-language requirement.
        runtime: Option<String>,
    },
    /// The build file of another track, relabelled.
    CopyPrior(u64),
    /// Every package at the major line of its latest published version.
    Latest {
        /// The member packages.
        packages: Vec<PackageName>,
        /// The core runtime constraint.
        core: VersionConstraint,
        /// The runtime-language requirement.
        runtime: Option<String>,
    },
}

/// Options of [`Lifecycle::prepare`].
#[derive(Clone, Debug, Default)]
pub struct PrepareOptions {
    /// Overrides the phase derived from the release identifier.
    pub phase: Option<ReleasePhase>,
    /// Manual pins.
    pub pins: Pins,
    /// Confirms changes a frozen release would otherwise refuse.
    pub confirm: bool,
    /// Stops the metadata fetch.
    pub cancel: CancellationToken,
}

/// The outcome of a successful [`Lifecycle::prepare`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepared {
    /// The manifest that was written.
    pub manifest: PinnedManifest,
    /// What changed relative to the previous deps file of the release.
    pub diff: Vec<Change>,
}

/// The outcome of a best-effort [`Lifecycle::sweep`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepReport {
    /// Every fetch that failed.
    pub failures: Vec<FetchError>,
    /// Whatever resolved, and every blocker.
    pub resolution: PartialResolution,
}

/// Errors raised by lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A manifest could not be loaded or stored.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// The release could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// A change was refused.
    #[error(transparent)]
    Diff(#[from] StructuralDiffError),
    /// The artifact could not be built.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The metadata fetch was cancelled.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    /// The track has no build file.
    #[error("no build file at {}, the track has not been drafted", .0.display())]
    NotDrafted(PathBuf),
    /// The track already has a build file.
    #[error("{} already exists", .0.display())]
    AlreadyDrafted(PathBuf),
    /// The release has no deps file.
    #[error("no deps file at {}, the release has not been prepared", .0.display())]
    NotPinned(PathBuf),
}

/// Performs lifecycle operations on the files under a [`Layout`].
#[derive(Debug)]
pub struct Lifecycle<I> {
    layout: Layout,
    scheduler: Scheduler<I>,
}

//================================================================================================
// Impls
//================================================================================================

impl Layout {
    /// A layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `curate-{track}.build.toml`
    pub fn build_file(&self, track: u64) -> PathBuf {
        self.root.join(format!("curate-{track}.build.toml"))
    }

    /// `curate-{release}.deps.toml`
    pub fn deps_file(&self, release: &ReleaseId) -> PathBuf {
        self.root.join(format!("curate-{release}.deps.toml"))
    }

    /// `curate-{release}.plan.json`
    pub fn plan_file(&self, release: &ReleaseId) -> PathBuf {
        self.root.join(format!("curate-{release}.plan.json"))
    }
}

impl<I: QueryIndex> Lifecycle<I> {
    /// Lifecycle operations over `layout`, fetching through `scheduler`.
    pub fn new(layout: Layout, scheduler: Scheduler<I>) -> Self {
        Lifecycle { layout, scheduler }
    }

    /// The file layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The state of `release`, computed from the files present.
    pub fn state(&self, release: &ReleaseId) -> ReleaseState {
        if !self.layout.build_file(release.major()).exists() {
            ReleaseState::Uninitialized
        } else if !self.layout.deps_file(release).exists() {
            ReleaseState::Drafted
        } else if !self.layout.plan_file(release).exists() {
            ReleaseState::Pinned
        } else {
            ReleaseState::Built
        }
    }

    /// Writes the build file of a new major track.
    ///
    /// An existing build file is only replaced when `force` is set.
    pub async fn new_release(
        &self,
        track: u64,
        seed: Seed,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<ConstraintManifest, LifecycleError> {
        let path = self.layout.build_file(track);
        if path.exists() && !force {
            return Err(LifecycleError::AlreadyDrafted(path));
        }

        let manifest = match seed {
            Seed::Empty { core, runtime } => ConstraintManifest::new(track, core, runtime),
            Seed::CopyPrior(from) => {
                let mut prior = self.read_build_file(from)?;
                prior.track = track;
                prior
            },
            Seed::Latest {
                packages,
                core,
                runtime,
            } => {
                let mut manifest = ConstraintManifest::new(track, core, runtime);
                manifest.packages = self.latest_tracks(packages, cancel).await?;
                manifest
            },
        };

        manifest.write(&path)?;
        tracing::info!(
            track,
            packages = manifest.packages.len(),
            path = %path.display(),
            "drafted track"
        );
        Ok(manifest)
    }

    /// Resolves `release` and writes its deps file.
    pub async fn prepare(
        &self,
        release: &ReleaseId,
        opts: PrepareOptions,
    ) -> Result<Prepared, LifecycleError> {
        let phase = opts.phase.unwrap_or_else(|| ReleasePhase::from(release));
        let constraints = self.read_build_file(release.major())?;

        let deps_path = self.layout.deps_file(release);
        let prior = if deps_path.exists() {
            let (prior, status) = PinnedManifest::read_checked(&deps_path)?;
            if !status.is_intact() {
                return Err(StructuralDiffError::ManualEdit { path: deps_path }.into());
            }
            check_release(&deps_path, release, &prior)?;
            Some(prior)
        } else {
            None
        };

        let constraints = if phase.narrows_to_bugfix() {
            if prior.is_none() {
                tracing::warn!(
                    %release,
                    %phase,
                    "no prior deps file to freeze against, ranges are anchored at their lower bounds"
                );
            }
            constraints.feature_frozen(prior.as_ref())
        } else {
            constraints
        };

        let catalog = self
            .scheduler
            .fetch_all(constraints.packages.keys().cloned(), &opts.cancel)
            .await?;

        let manifest = Resolver::new(&constraints, &catalog, phase)
            .prior(prior.as_ref())
            .pins(&opts.pins)
            .confirmed(opts.confirm)
            .resolve(release.clone())?;

        let diff = prior
            .as_ref()
            .map(|p| diff_pinned(p, &manifest))
            .unwrap_or_default();
        gate(&diff, phase, opts.confirm)?;

        manifest.write(&deps_path)?;
        tracing::info!(
            %release,
            %phase,
            packages = manifest.packages.len(),
            changes = diff.len(),
            path = %deps_path.display(),
            "pinned release"
        );
        Ok(Prepared { manifest, diff })
    }

    /// The phase of the newest release of `track` that has a deps file.
    ///
    /// A track with no pinned release is still in [`ReleasePhase::Alpha`].
    pub fn current_phase(&self, track: u64) -> Result<ReleasePhase, LifecycleError> {
        let mut newest: Option<(ReleasePhase, ReleaseId)> = None;
        for entry in std::fs::read_dir(self.layout.root()).map_err(ManifestError::from)? {
            let entry = entry.map_err(ManifestError::from)?;
            let name = entry.file_name();
            let Some(release) = name
                .to_str()
                .and_then(|n| n.strip_prefix("curate-"))
                .and_then(|n| n.strip_suffix(".deps.toml"))
                .and_then(|n| n.parse::<ReleaseId>().ok())
            else {
                continue;
            };
            if release.major() != track {
                continue;
            }
            let key = (ReleasePhase::from(&release), release);
            if newest.as_ref().is_none_or(|n| *n < key) {
                newest = Some(key);
            }
        }

        let phase = newest.as_ref().map_or(ReleasePhase::Alpha, |(phase, _)| *phase);
        tracing::debug!(track, %phase, release = ?newest.map(|(_, r)| r.to_string()), "derived track phase");
        Ok(phase)
    }

    /// Replaces the build file of `track` with `edited`, gating the changes by `phase`.
    pub fn accept_constraint_edit(
        &self,
        track: u64,
        edited: &ConstraintManifest,
        phase: ReleasePhase,
        confirm: bool,
    ) -> Result<Vec<Change>, LifecycleError> {
        let path = self.layout.build_file(track);
        let current = self.read_build_file(track)?;
        if edited.track != track {
            return Err(ManifestError::Mismatch {
                path,
                expected: format!("track {track}"),
                found: format!("track {}", edited.track),
            }
            .into());
        }

        let changes = diff_constraints(&current, edited);
        gate(&changes, phase, confirm)?;
        edited.write(&path)?;
        tracing::info!(track, changes = changes.len(), "accepted build file edit");
        Ok(changes)
    }

    /// Rebuilds `release` from its deps file, without resolving anything.
    ///
    /// A deps file edited by hand is refused unless `allow_edited` is set.
    pub async fn rebuild(
        &self,
        release: &ReleaseId,
        builder: &impl ArtifactBuilder,
        allow_edited: bool,
    ) -> Result<BuildPlan, LifecycleError> {
        let deps_path = self.layout.deps_file(release);
        if !deps_path.exists() {
            return Err(LifecycleError::NotPinned(deps_path));
        }
        let (pinned, status) = PinnedManifest::read_checked(&deps_path)?;
        check_release(&deps_path, release, &pinned)?;
        if !status.is_intact() {
            if !allow_edited {
                return Err(StructuralDiffError::ManualEdit { path: deps_path }.into());
            }
            tracing::warn!(path = %deps_path.display(), ?status, "building from an edited deps file");
        }

        let plan = BuildPlan::from(&pinned);
        let plan_path = self.layout.plan_file(release);
        write_atomic(&plan_path, &plan.render().map_err(BuildError::from)?)?;
        builder.build(&plan, &plan_path).await?;
        tracing::info!(%release, path = %plan_path.display(), "built release");
        Ok(plan)
    }

    /// The changes between the deps files of two releases.
    pub fn diff_releases(
        &self,
        old: &ReleaseId,
        new: &ReleaseId,
    ) -> Result<Vec<Change>, LifecycleError> {
        Ok(diff_pinned(
            &self.read_deps_file(old)?,
            &self.read_deps_file(new)?,
        ))
    }

    /// Fetches and resolves `release` as far as possible, without writing anything.
    pub async fn sweep(
        &self,
        release: &ReleaseId,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, LifecycleError> {
        let phase = ReleasePhase::from(release);
        let constraints = self.read_build_file(release.major())?;
        let deps_path = self.layout.deps_file(release);
        let prior = if deps_path.exists() {
            Some(PinnedManifest::read(&deps_path)?)
        } else {
            None
        };
        let constraints = if phase.narrows_to_bugfix() {
            constraints.feature_frozen(prior.as_ref())
        } else {
            constraints
        };

        let catalog = self
            .scheduler
            .fetch_all(constraints.packages.keys().cloned(), cancel)
            .await?;
        let resolution = Resolver::new(&constraints, &catalog, phase)
            .prior(prior.as_ref())
            .resolve_partial();

        Ok(SweepReport {
            failures: catalog.failures().cloned().collect(),
            resolution,
        })
    }

    fn read_build_file(&self, track: u64) -> Result<ConstraintManifest, LifecycleError> {
        let path = self.layout.build_file(track);
        if !path.exists() {
            return Err(LifecycleError::NotDrafted(path));
        }
        let manifest = ConstraintManifest::read(&path)?;
        if manifest.track != track {
            return Err(ManifestError::Mismatch {
                path,
                expected: format!("track {track}"),
                found: format!("track {}", manifest.track),
            }
            .into());
        }
        Ok(manifest)
    }

    fn read_deps_file(&self, release: &ReleaseId) -> Result<PinnedManifest, LifecycleError> {
        let path = self.layout.deps_file(release);
        if !path.exists() {
            return Err(LifecycleError::NotPinned(path));
        }
        let manifest = PinnedManifest::read(&path)?;
        check_release(&path, release, &manifest)?;
        Ok(manifest)
    }

    /// The `major_track` range of every package's latest version.
    async fn latest_tracks(
        &self,
        packages: Vec<PackageName>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<PackageName, VersionConstraint>, LifecycleError> {
        let catalog = self.scheduler.fetch_all(packages.clone(), cancel).await?;

        let mut tracks = BTreeMap::new();
        let mut blockers = Vec::new();
        for name in packages {
            let entry = catalog.get(&name);
            let latest = entry.and_then(|e| latest_version(e.versions()));
            match (entry, latest) {
                (_, Some(latest)) => {
                    let range = VersionRange::major_track(latest);
                    tracing::debug!(package = %name, %latest, %range, "seeded");
                    tracks.insert(name, VersionConstraint::new(range));
                },
                (Some(CatalogEntry::FetchFailed(e)), None) => blockers.push(Blocker {
                    subject: Subject::Package(name),
                    constraint: None,
                    reason: BlockReason::FetchFailed(e.clone()),
                }),
                (Some(_), None) => blockers.push(Blocker {
                    subject: Subject::Package(name),
                    constraint: None,
                    reason: BlockReason::NoSatisfyingVersion,
                }),
                (None, None) => blockers.push(Blocker {
                    subject: Subject::Package(name),
                    constraint: None,
                    reason: BlockReason::NotInCatalog,
                }),
            }
        }

        if blockers.is_empty() {
            Ok(tracks)
        } else {
            Err(ResolutionError { blockers }.into())
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

/// The highest final version, or the highest prerelease when there is no final one.
fn latest_version(versions: &[Version]) -> Option<&Version> {
    versions
        .iter()
        .filter(|v| v.pre.is_empty())
        .max()
        .or_else(|| versions.iter().max())
}

fn check_release(
    path: &Path,
    release: &ReleaseId,
    manifest: &PinnedManifest,
) -> Result<(), ManifestError> {
    if &manifest.release == release {
        Ok(())
    } else {
        Err(ManifestError::Mismatch {
            path: path.to_owned(),
            expected: format!("release {release}"),
            found: format!("release {}", manifest.release),
        })
    }
}
