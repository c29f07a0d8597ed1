use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Install the process wide `tracing` subscriber, once.
///
/// The filter comes from `RUST_LOG` when set, from `default_value` otherwise. The library never
/// calls this itself: hosts and tests opt in.
pub fn log_init(default_value: &str) {
    LOG_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_value))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let format = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .compact();

        // another subscriber may already be installed by the host
        drop(
            tracing_subscriber::registry()
                .with(filter)
                .with(format)
                .try_init(),
        );
    });
}
