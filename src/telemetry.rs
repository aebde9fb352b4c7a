//! Telemetry initialization.
//!
//! Events go to stderr, either as human-readable lines or as JSON. The
//! filter comes from `BRANCHLINE_LOG` when set, otherwise from the
//! configured directives.

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

use crate::core::config::LogFormat;

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "BRANCHLINE_LOG";

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed is a no-op, so
/// tests and embedders may call it freely.
pub fn init(filter: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
            )
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
