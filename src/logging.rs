use tracing_subscriber::EnvFilter;

use crate::config::types::LogFormat;

/// Initialize the global tracing subscriber.
///
/// Pretty mode for interactive use, JSON for log shipping. The filter string
/// accepts the usual `EnvFilter` directives (`info`, `streamgate=debug`, ...).
pub fn setup_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
