use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,relay_proxy=debug";

/// Installs the global subscriber for the binary.
///
/// `RUST_LOG` wins over [`DEFAULT_FILTER`]; `json` switches the formatter to
/// one flattened JSON object per event.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    if json {
        subscriber.json().flatten_event(true).with_current_span(true).init();
    } else {
        subscriber.compact().init();
    }
}
