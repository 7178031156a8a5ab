//! This module defines the `diff` subcommand.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dist::ReleaseId;

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub(super) struct Args {
    /// The older release.
    #[arg(value_parser = super::parse_release)]
    old: ReleaseId,
    /// The newer release.
    #[arg(value_parser = super::parse_release)]
    new: ReleaseId,
}

pub(super) fn run(args: Args) -> Result<ExitCode> {
    let changes = super::lifecycle()?.diff_releases(&args.old, &args.new)?;

    for change in &changes {
        let confirm = change.kind.needs_confirmation();
        tracing::info!(%change, confirm, "change");
    }
    tracing::info!(old = %args.old, new = %args.new, changes = changes.len(), "compared releases");
    Ok(ExitCode::SUCCESS)
}
