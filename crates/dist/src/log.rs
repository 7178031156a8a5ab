//! Progress presentation for long running batches.
//!
//! Batches get a span rendered as a bar by `tracing-indicatif`; work on a single
//! package gets a spinner nested underneath it. When no indicatif layer is
//! installed these calls only create ordinary spans.

use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::style::ProgressStyle;

/// Creates the span of a batch over `len` items and styles it as a bar.
pub fn batch_span(kind: &'static str, msg: &str, len: usize) -> Span {
    let span = tracing::info_span!("batch", kind, items = len);
    let style = ProgressStyle::with_template(
        "{elapsed} ░ {prefix} ░ {bar:30.green/black} {pos}/{len} ░ {msg}",
    )
    .unwrap_or(ProgressStyle::default_bar())
    .progress_chars("█▒ ");
    span.pb_set_style(&style);
    span.pb_set_message(msg);
    span.pb_set_length(len as u64);
    span
}

/// Creates the span of work on one package and styles it as a spinner.
pub fn package_span(action: &str, package: &str) -> Span {
    let span = tracing::info_span!("package", package);
    span.pb_set_style(
        &ProgressStyle::with_template("  {span_child_prefix} {spinner:.blue} {wide_msg}")
            .unwrap_or(ProgressStyle::default_spinner()),
    );
    span.pb_set_message(&format!("{action} {package}"));
    span
}

/// Advances the bar of the current batch by one item.
pub fn tick() {
    Span::current().pb_inc(1);
}
