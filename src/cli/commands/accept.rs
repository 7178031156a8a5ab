//! This module defines the `accept` subcommand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use dist::{ConstraintManifest, ReleasePhase};

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub(super) struct Args {
    /// The track whose build file is replaced.
    major: u64,

    /// The edited build file.
    file: PathBuf,

    /// Overrides the phase derived from the newest deps file of the track.
    #[arg(long, value_name = "PHASE")]
    phase: Option<ReleasePhase>,

    /// Accept removals and widened ranges in a frozen phase.
    #[arg(long)]
    confirm: bool,
}

pub(super) fn run(args: Args) -> Result<ExitCode> {
    let edited = ConstraintManifest::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let lifecycle = super::lifecycle()?;
    let phase = match args.phase {
        Some(phase) => phase,
        None => lifecycle.current_phase(args.major)?,
    };
    tracing::debug!(track = args.major, %phase, "gating build file edit");
    let changes = lifecycle.accept_constraint_edit(args.major, &edited, phase, args.confirm)?;

    for change in &changes {
        tracing::info!(%change, "accepted");
    }
    tracing::info!(track = args.major, changes = changes.len(), "build file updated");
    Ok(ExitCode::SUCCESS)
}
