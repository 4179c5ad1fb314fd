//! Structured logging setup.
//!
//! Centralized `tracing` configuration, driven by the `VECMESH_LOG`
//! environment variable.
//!
//! # Environment variables
//!
//! - `VECMESH_LOG=info` - default level
//! - `VECMESH_LOG=debug` - verbose logging
//! - `VECMESH_LOG=vecmesh_node::event_loop=debug` - module-specific

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global subscriber with the default level. Call once at
/// startup; later calls are ignored.
pub fn init() {
    init_with_default("info");
}

/// Initializes the global subscriber with a custom default level, used when
/// `VECMESH_LOG` is not set.
pub fn init_with_default(default_level: &str) {
    let filter =
        EnvFilter::try_from_env("VECMESH_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let _ = subscriber.try_init();
}

/// JSON output for log aggregators.
pub fn init_json() {
    let filter = EnvFilter::try_from_env("VECMESH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(true).json();

    let _ = subscriber.try_init();
}
