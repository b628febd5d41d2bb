//! Log initialization.
//!
//! The filter comes from `RUST_LOG`, then `LOGLEVEL` (a bare level such as
//! `debug`), then defaults to `info`. Everything goes to stderr so stdout
//! only ever carries the report.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Build the filter directive from the environment.
pub fn filter_directive(rust_log: Option<&str>, loglevel: Option<&str>) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .or_else(|| loglevel.filter(|v| !v.trim().is_empty()))
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

/// Install the global subscriber. `json` switches to one JSON object per
/// event.
pub fn init(json: bool) {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let directive = filter_directive(
        std::env::var("RUST_LOG").ok().as_deref(),
        std::env::var("LOGLEVEL").ok().as_deref(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {e}");
    }
}
