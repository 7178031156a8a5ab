//! This module defines the `sweep` subcommand.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use dist::ReleaseId;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub(super) struct Args {
    /// The release to check.
    #[arg(value_parser = super::parse_release)]
    release: ReleaseId,
}

/// Fails when anything would block `prepare`.
pub(super) async fn run(args: Args, cancel: &CancellationToken) -> Result<ExitCode> {
    let report = super::lifecycle()?.sweep(&args.release, cancel).await?;

    for failure in &report.failures {
        tracing::warn!(subject = %failure.subject, error = %failure, "fetch failed");
    }
    for blocker in &report.resolution.blockers {
        tracing::warn!(
            subject = %blocker.subject,
            code = blocker.reason.code(),
            %blocker,
            "blocker"
        );
    }

    let ok = report.failures.is_empty() && report.resolution.is_complete();
    tracing::info!(
        release = %args.release,
        resolved = report.resolution.packages.len(),
        failures = report.failures.len(),
        blockers = report.resolution.blockers.len(),
        "sweep finished"
    );
    Ok(super::exit(ok))
}
