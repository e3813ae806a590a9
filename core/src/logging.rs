//! One-shot tracing initialization.
//!
//! Library code only emits `tracing` events; installing a subscriber
//! is the embedding application's call. These helpers cover the common
//! case and are safe to call more than once.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a formatted stderr subscriber at the `info` level (or
/// whatever `RUST_LOG` says). Subsequent calls are ignored.
pub fn init() {
    init_with_filter("info");
}

/// Install a formatted stderr subscriber with `directives` as the
/// fallback filter when `RUST_LOG` is unset. Subsequent calls are
/// ignored.
pub fn init_with_filter(directives: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}
