use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the hub.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to every target.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(default_level)));

    // try_init so tests can call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn level_directive(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}
