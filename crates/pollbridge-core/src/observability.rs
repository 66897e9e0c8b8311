use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// - Debug builds: human-readable output
/// - Release builds: JSON lines for log aggregation
///
/// Level comes from `RUST_LOG` (default `info`). Calling it twice is harmless;
/// the second call leaves the existing subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init: テストや埋め込み先で既に subscriber があっても panic しない
    let _ = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    };
}
