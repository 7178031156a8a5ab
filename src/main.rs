//! The main entry point for the curate CLI.

#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use curate::cli::{self, Args};
use tokio_util::sync::CancellationToken;

//================================================================================================
// Functions
//================================================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_from(cli::change_directory());
    let Args { log, .. } = args;

    let _guard = cli::init_global_subscriber(log);

    let cancel = CancellationToken::new();
    let run = cli::run(args, cancel.clone());
    tokio::pin!(run);

    let res = tokio::select! {
        res = &mut run => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Ctrl+C received, finishing in-flight fetches...");
            cancel.cancel();
            run.await
        }
    };

    match res {
        Ok(code) => code,
        Err(e) => {
            curate::fatal!(format!("{e:#}"));
            ExitCode::FAILURE
        },
    }
}
