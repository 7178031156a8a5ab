//! Argument parsing and dispatch for the `curate` binary.

mod commands;
pub mod logging;

use std::path::PathBuf;

use clap::Parser;
pub use commands::run;
pub use logging::init_global_subscriber;

//================================================================================================
// Types
//================================================================================================

/// Pin, build and certify the package set of a distribution release.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Change the current working directory
    ///
    /// If specified, changes the current working directory to the given
    /// path before executing any commands. Relative data and cache paths from
    /// the configuration are resolved against it.
    #[arg(short = 'C', value_name = "DIR", global = true, value_parser = validate_path)]
    working_directory: Option<PathBuf>,

    /// Logging options.
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    command: commands::Commands,
}

/// Verbosity controls shared by every subcommand.
#[derive(Parser, Clone, Copy, Debug)]
#[command(next_help_heading = "Log Options")]
pub struct LogArgs {
    /// Set the level of verbosity
    ///
    /// This flag can be used multiple times to increase verbosity:
    /// 1. -v    for DEBUG level
    /// 2. -vv   for TRACE level
    ///
    /// If not specified, defaults to INFO level. `RUST_LOG` takes precedence
    /// over this flag.
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase logging verbosity",
    )]
    verbosity: u8,

    /// Suppress verbosity (*takes precedent*)
    ///
    /// 1. -q    for WARN level
    /// 2. -qq   for ERROR level
    ///
    /// Overrides both `--verbosity` and `RUST_LOG`.
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
    )]
    quiet: u8,
}

//================================================================================================
// Functions
//================================================================================================

fn validate_path(path: &str) -> Result<PathBuf, std::io::Error> {
    std::fs::canonicalize(path)
}

/// Applies `-C DIR` before the configuration is first read, returning the arguments unchanged.
pub fn change_directory() -> Vec<String> {
    let mut pending = false;
    let mut done = false;
    std::env::args()
        .inspect(|arg| {
            if pending {
                std::env::set_current_dir(arg).ok();
                pending = false;
                done = true;
            } else if !done && arg == "-C" {
                pending = true;
            }
        })
        .collect()
}
