use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `REEL_LOG` first, then `RUST_LOG`,
/// then a default.
///
/// Log field contract for engine workers:
/// - Always include the node `rank` and the worker `id`.
/// - Include `item` (the work-item index) on any per-item event.
/// - Evaluate workers additionally include their `group` index.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("REEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
