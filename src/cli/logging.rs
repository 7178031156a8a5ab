//! Handles logging and progress bars for the CLI.

use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::style::ProgressStyle;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt};

use super::LogArgs;

//================================================================================================
// Statics
//================================================================================================

/// Whether ANSI escape codes may be written.
pub static ANSI: AtomicBool = AtomicBool::new(true);

//================================================================================================
// Modules
//================================================================================================

/// ANSI escape codes for styling terminal output.
pub mod ansi {
    /// Magenta text.
    pub const MAGENTA: &str = "\x1b[35m";
    /// Resets terminal styling.
    pub const RESET: &str = "\x1b[0m";
}

//================================================================================================
// Macros
//================================================================================================

/// Logs a fatal error.
#[macro_export]
macro_rules! fatal {
    ($error:expr) => {{
        use $crate::cli::logging::{ANSI, ansi};
        let ansi = ANSI.load(std::sync::atomic::Ordering::SeqCst);
        tracing::error!(
            fatal = true,
            "{}FATAL{} {}",
            if ansi { ansi::MAGENTA } else { "" },
            if ansi { ansi::RESET } else { "" },
            $error
        );
    }};
}

//================================================================================================
// Functions
//================================================================================================

/// Installs the global tracing subscriber.
///
/// On a terminal, compact human readable lines are interleaved with the
/// progress bars of fetch and validation batches. Otherwise every event is
/// written to stderr as JSON and no bars are drawn.
pub fn init_global_subscriber(args: LogArgs) -> WorkerGuard {
    let log_level = get_log_level(args);

    let env_filter = EnvFilter::from_default_env().add_directive(log_level.into());

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let progress_layer = IndicatifLayer::new().with_progress_style(
        ProgressStyle::with_template("{span_child_prefix} {spinner} {wide_msg}")
            .unwrap_or(ProgressStyle::default_spinner()),
    );

    if std::io::stderr().is_terminal() {
        let fmt = fmt::layer()
            .without_time()
            .with_writer(progress_layer.get_stderr_writer())
            .with_target(false)
            .with_span_events(fmt::format::FmtSpan::NONE)
            .compact()
            .boxed();
        tracing_subscriber::registry()
            .with(fmt)
            .with(env_filter)
            .with(progress_layer)
            .init();
    } else {
        ANSI.store(false, Ordering::SeqCst);
        let fmt = fmt::layer()
            .with_ansi(false)
            .json()
            .with_writer(non_blocking)
            .boxed();
        tracing_subscriber::registry().with(fmt).with(env_filter).init();
    }

    guard
}

fn get_log_level(args: LogArgs) -> LevelFilter {
    match args.quiet {
        0 => (),
        1 => return LevelFilter::WARN,
        _ => return LevelFilter::ERROR,
    }

    if let Ok(rust_log) = std::env::var(EnvFilter::DEFAULT_ENV)
        && let Ok(level) = LevelFilter::from_str(&rust_log)
    {
        return level;
    }

    match args.verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(verbosity: u8, quiet: u8) -> LogArgs {
        LogArgs { verbosity, quiet }
    }

    #[test]
    fn quiet_takes_precedence() {
        assert_eq!(get_log_level(args(2, 1)), LevelFilter::WARN);
        assert_eq!(get_log_level(args(0, 3)), LevelFilter::ERROR);
    }
}
