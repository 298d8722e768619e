//! Structured logging for expansion runs using **tracing**.
//!
//! The engine itself only emits events; hosts decide where they go. The CLI
//! installs the JSON subscriber below so stdout stays reserved for expanded
//! output and reports.

use tracing::{error, info, warn};

/// Initializes the global tracing collector (subscriber).
///
/// Output is JSON on stderr. Calls after the first are ignored.
///
/// # Environment Variables
/// - `RUST_LOG`: Controls log filtering (e.g., `RUST_LOG=buildmacros_core=debug`)
pub fn init_structured_logging() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_level(true)
        .with_target(true)
        .with_current_span(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logs a custom event with a specific event name.
///
/// Maps to the appropriate level based on the event name.
pub fn log_event(event: &str, detail: &str) {
    match event.to_uppercase().as_str() {
        "ERROR" => error!(event = %event, detail = %detail),
        "WARN" | "WARNING" => warn!(event = %event, detail = %detail),
        _ => info!(event = %event, detail = %detail),
    }
}
