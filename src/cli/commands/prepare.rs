//! This module defines the `prepare` subcommand.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dist::lifecycle::PrepareOptions;
use dist::{PackageName, ReleaseId, ReleasePhase};
use semver::Version;
use tokio_util::sync::CancellationToken;

//================================================================================================
// Types
//================================================================================================

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true, next_help_heading = "Prepare Options")]
pub(super) struct Args {
    /// The release to prepare, e.g. `8.0.0b1`.
    #[arg(value_parser = super::parse_release)]
    release: ReleaseId,

    /// Resolve as if the release were in this phase.
    #[arg(long, value_name = "PHASE")]
    phase: Option<ReleasePhase>,

    /// Pin a package to an exact version, e.g. `community.general=7.2.1`.
    #[arg(long = "pin", value_name = "NAME=VERSION", value_parser = parse_pin)]
    pins: Vec<(PackageName, Version)>,

    /// Accept removals, downgrades and widened ranges in a frozen release.
    #[arg(long)]
    confirm: bool,
}

//================================================================================================
// Functions
//================================================================================================

pub(super) async fn run(args: Args, cancel: CancellationToken) -> Result<ExitCode> {
    let lifecycle = super::lifecycle()?;
    let prepared = lifecycle
        .prepare(
            &args.release,
            PrepareOptions {
                phase: args.phase,
                pins: args.pins.into_iter().collect(),
                confirm: args.confirm,
                cancel,
            },
        )
        .await?;

    for change in &prepared.diff {
        tracing::info!(%change, "changed since the previous release");
    }
    tracing::info!(
        release = %prepared.manifest.release,
        core = %prepared.manifest.core,
        packages = prepared.manifest.packages.len(),
        file = %lifecycle.layout().deps_file(&args.release).display(),
        "release pinned"
    );
    Ok(ExitCode::SUCCESS)
}

fn parse_pin(s: &str) -> Result<(PackageName, Version), String> {
    let (name, version) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VERSION, found `{s}`"))?;
    let name = name.trim().parse().map_err(|e| format!("{e}"))?;
    let version = Version::parse(version.trim()).map_err(|e| e.to_string())?;
    Ok((name, version))
}
