//! This module defines the `rebuild` subcommand.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dist::ReleaseId;
use dist::lifecycle::CommandBuilder;

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub(super) struct Args {
    /// The pinned release to build.
    #[arg(value_parser = super::parse_release)]
    release: ReleaseId,

    /// Build even if the deps file was edited by hand.
    #[arg(long)]
    allow_edited: bool,
}

pub(super) async fn run(args: Args) -> Result<ExitCode> {
    let builder = CommandBuilder::new(config::CONFIG.build.command.clone());
    let plan = super::lifecycle()?
        .rebuild(&args.release, &builder, args.allow_edited)
        .await?;

    tracing::info!(release = %plan.release, packages = plan.packages.len(), "release built");
    Ok(ExitCode::SUCCESS)
}
