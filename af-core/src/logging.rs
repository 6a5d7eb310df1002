use std::str::FromStr;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Default filter used when the requested one does not parse.
const FALLBACK_FILTER: &str = "info";

/// Builds the filter for `setup`, falling back to `info` if `env_filter` is not a valid
/// directive string. `RUST_LOG` takes precedence when set.
#[must_use]
pub fn build_filter(env_filter: &str) -> EnvFilter {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return from_env;
    }
    EnvFilter::from_str(env_filter).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Installs the global `tracing` subscriber. Span close events are logged so that the
/// `#[instrument]`ed phases report their timing.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn setup(env_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(env_filter))
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .compact()
        .try_init();
}
