//! The `curate` subcommands.
//!
//! Each subcommand extracts what it needs from [`config::CONFIG`] and hands it
//! to the `dist` library explicitly.

mod accept;
mod diff;
mod new_track;
mod prepare;
mod rebuild;
mod sweep;
mod validate;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use dist::ReleaseId;
use dist::fetch::{FetchSettings, Scheduler};
use dist::index::RetryPolicy;
use dist::index::http::{HttpIndex, IndexSettings};
use dist::lifecycle::{Layout, Lifecycle};
use tokio_util::sync::CancellationToken;

use super::Args;

//================================================================================================
// Types
//================================================================================================

#[derive(Subcommand)]
pub(super) enum Commands {
    /// Draft the build file of a new major track.
    ///
    /// The constraints are either empty, copied from another track, or seeded
    /// from the latest published release of every listed package.
    #[command(verbatim_doc_comment)]
    NewTrack(new_track::Args),
    /// Resolve a release and write its deps file.
    ///
    /// The phase of the release decides which versions are eligible and
    /// which changes against the previous deps file need `--confirm`.
    #[command(verbatim_doc_comment)]
    Prepare(prepare::Args),
    /// Produce the build plan of a pinned release and run the build command.
    Rebuild(rebuild::Args),
    /// Show the structural differences between two deps files.
    Diff(diff::Args),
    /// Fetch and resolve best effort, reporting every problem at once.
    Sweep(sweep::Args),
    /// Compare each pinned artifact with the tag of its version.
    Validate(validate::Args),
    /// Replace a build file with an edited copy, gated on its diff.
    Accept(accept::Args),
}

//================================================================================================
// Functions
//================================================================================================

/// Runs the selected subcommand. `cancel` stops any fetch batch in progress.
pub async fn run(args: Args, cancel: CancellationToken) -> Result<ExitCode> {
    match args.command {
        Commands::NewTrack(args) => new_track::run(args, &cancel).await,
        Commands::Prepare(args) => prepare::run(args, cancel).await,
        Commands::Rebuild(args) => rebuild::run(args).await,
        Commands::Diff(args) => diff::run(args),
        Commands::Sweep(args) => sweep::run(args, &cancel).await,
        Commands::Validate(args) => validate::run(args).await,
        Commands::Accept(args) => accept::run(args),
    }
}

fn fetch_settings() -> FetchSettings {
    let fetch = &config::CONFIG.fetch;
    FetchSettings {
        concurrency: fetch.concurrency.max(1),
        policy: RetryPolicy {
            max_attempts: fetch.max_attempts,
            initial_backoff: Duration::from_millis(fetch.backoff_ms),
            task_timeout: Duration::from_secs(fetch.task_timeout_secs),
        },
    }
}

fn scheduler() -> Result<Scheduler<HttpIndex>> {
    let cfg = &config::CONFIG;
    let index = HttpIndex::new(IndexSettings {
        url: cfg
            .index
            .url
            .parse()
            .with_context(|| format!("invalid index url `{}`", cfg.index.url))?,
        core_url: cfg
            .index
            .core_url
            .parse()
            .with_context(|| format!("invalid core index url `{}`", cfg.index.core_url))?,
        core_package: cfg.index.core_package.clone(),
        request_timeout: Duration::from_secs(cfg.fetch.request_timeout_secs),
    })?;
    Ok(Scheduler::new(index, fetch_settings()))
}

fn layout() -> Layout {
    Layout::new(config::CONFIG.data.dir.clone())
}

fn lifecycle() -> Result<Lifecycle<HttpIndex>> {
    Ok(Lifecycle::new(layout(), scheduler()?))
}

fn exit(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn parse_release(s: &str) -> Result<ReleaseId, dist::ReleaseIdError> {
    s.parse()
}
