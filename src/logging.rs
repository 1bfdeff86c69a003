//! Process-wide logging initialization, grounded in the teacher's `src/logging/`
//! module: a `tracing_subscriber::fmt` layer driven by `EnvFilter`.
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Safe to call once at process startup;
/// subsequent calls are ignored (mirrors `tracing`'s own idempotent `try_init`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
