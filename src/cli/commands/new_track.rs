//! This module defines the `new-track` subcommand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use dist::lifecycle::Seed;
use dist::{VersionConstraint, VersionRange};
use tokio_util::sync::CancellationToken;

//================================================================================================
// Types
//================================================================================================

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true, next_help_heading = "Track Options")]
pub(super) struct Args {
    /// The major version of the new track.
    major: u64,

    /// Copy the build file of track N.
    #[arg(long, value_name = "N", conflicts_with_all = ["from_latest", "core", "runtime"])]
    copy_from: Option<u64>,

    /// Seed every package listed in the file at the major line of its latest release.
    #[arg(long, value_name = "PIECES_FILE")]
    from_latest: Option<PathBuf>,

    /// The version range of the core runtime.
    #[arg(long, value_name = "RANGE", required_unless_present = "copy_from")]
    core: Option<VersionRange>,

    /// The runtime-language requirement, e.g. `>=3.10`.
    #[arg(long, value_name = "REQ")]
    runtime: Option<String>,

    /// Overwrite an existing build file.
    #[arg(long)]
    force: bool,
}

//================================================================================================
// Functions
//================================================================================================

pub(super) async fn run(args: Args, cancel: &CancellationToken) -> Result<ExitCode> {
    let seed = match (args.copy_from, args.from_latest, args.core) {
        (Some(track), ..) => Seed::CopyPrior(track),
        (None, Some(pieces), Some(core)) => {
            let content = std::fs::read_to_string(&pieces)
                .with_context(|| format!("reading {}", pieces.display()))?;
            Seed::Latest {
                packages: dist::manifest::parse_pieces(&content)?,
                core: VersionConstraint::new(core),
                runtime: args.runtime,
            }
        },
        (None, None, Some(core)) => Seed::Empty {
            core: VersionConstraint::new(core),
            runtime: args.runtime,
        },
        (None, _, None) => anyhow::bail!("`--core` is required unless `--copy-from` is given"),
    };

    let lifecycle = super::lifecycle()?;
    let manifest = lifecycle
        .new_release(args.major, seed, args.force, cancel)
        .await?;

    tracing::info!(
        track = manifest.track,
        packages = manifest.packages.len(),
        core = %manifest.core,
        file = %lifecycle.layout().build_file(manifest.track).display(),
        "drafted track"
    );
    Ok(ExitCode::SUCCESS)
}
