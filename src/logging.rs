use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` wins over the default
/// filter; `detailed` turns on per-decision debug records.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing(detailed: bool) -> bool {
    let default_filter = if detailed {
        "info,kokoro_groupchat=debug"
    } else {
        "warn,kokoro_groupchat=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
