//! Structured Logging Configuration
//!
//! - JSON output for production (LOG_FORMAT=json)
//! - Human-readable output for development (default)
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: Set to "json" for JSON output, anything else for text (default: text)
//! - `RUST_LOG`: Standard log level filter (default: info)
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=ql_container=trace,aws_config=warn`
//!
//! Pollers and dispatch tasks log with a `queue` field, so filtering one
//! queue's activity out of JSON logs is a matter of matching that field.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize logging for the given service.
///
/// Reads LOG_FORMAT to pick the output format and RUST_LOG for filtering
/// (defaults to INFO). Safe to call more than once; later calls are ignored.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let env_filter = default_filter();

    let installed = if log_format.eq_ignore_ascii_case("json") {
        init_json_logging(env_filter)
    } else {
        init_text_logging(env_filter)
    };

    if installed {
        tracing::debug!(service = %service_name, format = %log_format, "Logging initialized");
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(false)
                .with_target(true)
                .flatten_event(true)
                .with_span_events(FmtSpan::CLOSE),
        )
        .try_init()
        .is_ok()
}

fn init_text_logging(env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(true),
        )
        .try_init()
        .is_ok()
}

/// Initialize logging for tests; output is captured by the test harness.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}
