//! Structured logging setup.
//!
//! Thin wrapper over `tracing`, enabled by the `tracing-integration` feature
//! (the default). When the feature is off, every logging call in this crate
//! compiles to a no-op.

/// Installs a global `tracing` subscriber suitable for a native host process
/// driving the Supervisor outside of a browser (development CLI, tests).
/// The wasm-bindgen sibling crate installs its own subscriber that forwards
/// to `console.log` instead.
#[cfg(feature = "tracing-integration")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(not(feature = "tracing-integration"))]
pub fn init_tracing() {}
