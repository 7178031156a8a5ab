//! # Dist Crate
//!
//! The `dist` crate computes and certifies the *distribution closure* of a
//! meta-package: one concrete version for every independently released member
//! package, chosen so that each satisfies the range declared for the release.
//!
//! ## Key Concepts
//!
//! **Constraint manifests** (build files) declare, for one major track, the range
//! each member package may be resolved within, together with the core runtime
//! constraint.
//!
//! **Pinned manifests** (deps files) record the exact result of a resolution for a
//! single release identifier such as `8.1.0` or `9.0.0b2`. Once a release enters a
//! frozen phase, its pinned versions may only move upwards.
//!
//! **Catalogs** are per-run snapshots of the remote index. They are populated by a
//! bounded pool of fetch tasks and never change while a resolution reads them.
//!
//! ## Architecture
//!
//! - [`index`] - Talks to the remote version index, with retries and backoff.
//! - [`fetch`] - Runs index queries concurrently under a fixed ceiling.
//! - [`catalog`] - The immutable snapshot produced by a fetch batch.
//! - [`resolve`] - Picks one version per package under release phase rules.
//! - [`manifest`] - Build and deps files, and the structural diff between versions.
//! - [`lifecycle`] - Drafting, preparing and rebuilding releases on disk.
//! - [`validate`] - Cross-checks shipped artifacts against upstream tags.
//! - [`sources`] - Where each package's upstream repository lives.
//! - [`log`] - Progress spans for long running batches.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use dist::{ConstraintManifest, ReleaseId, ReleasePhase, Resolver};
//!
//! # fn demo(catalog: &dist::VersionCatalog) -> anyhow::Result<()> {
//! let constraints = ConstraintManifest::read("curate-8.build.toml")?;
//! let release: ReleaseId = "8.1.0".parse()?;
//! let pinned = Resolver::new(&constraints, catalog, ReleasePhase::from(&release))
//!     .resolve(release)?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod catalog;
pub mod fetch;
pub mod index;
pub mod lifecycle;
pub mod log;
pub mod manifest;
mod name;
mod phase;
pub mod resolve;
pub mod sources;
pub mod validate;
mod version;

pub use catalog::{CatalogEntry, CoreRelease, VersionCatalog};
pub use manifest::{ConstraintManifest, PinnedManifest};
pub use name::{NameError, PackageName, Subject};
pub use phase::{PhaseError, ReleasePhase};
pub use resolve::{Pins, ResolutionError, Resolver};
pub use version::{
    PreKind, RangeError, ReleaseId, ReleaseIdError, Upper, VersionConstraint, VersionRange,
};
