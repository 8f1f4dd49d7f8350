//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level so operators can raise verbosity
/// without a config change. Safe to call once per process; embedding services
/// that already install a subscriber should skip this.
pub fn init_logging(log_level: &str) {
    let default_filter = format!("skillswap_comms={log_level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}
