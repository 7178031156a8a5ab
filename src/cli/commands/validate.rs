//! This module defines the `validate` subcommand.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dist::ReleaseId;
use dist::sources::SourceMap;
use dist::validate::{GitTags, Validator};

#[derive(Parser, Debug)]
#[command(arg_required_else_help = true)]
pub(super) struct Args {
    /// The pinned release to validate.
    #[arg(value_parser = super::parse_release)]
    release: ReleaseId,

    /// The source repository map; defaults to `data.sources` from the configuration.
    #[arg(long, value_name = "FILE")]
    sources: Option<PathBuf>,
}

pub(super) async fn run(args: Args) -> Result<ExitCode> {
    let cfg = &config::CONFIG;
    let layout = super::layout();
    let deps = layout.deps_file(&args.release);
    let pinned = dist::PinnedManifest::read(&deps)
        .with_context(|| format!("reading {}", deps.display()))?;

    let sources_path = args.sources.unwrap_or_else(|| cfg.data.sources_path());
    let sources = SourceMap::read(&sources_path)
        .with_context(|| format!("reading {}", sources_path.display()))?;
    let tags = GitTags::open(&cfg.cache.root)?;

    let validator = Validator::new(
        Arc::new(super::scheduler()?),
        Arc::new(tags),
        sources,
        cfg.fetch.concurrency,
    );
    let report = validator.validate(&pinned).await;

    for mismatch in report.iter() {
        tracing::warn!(
            package = %mismatch.package,
            version = %mismatch.version,
            code = mismatch.kind.code(),
            %mismatch,
            "mismatch"
        );
    }
    Ok(super::exit(report.is_pass()))
}
