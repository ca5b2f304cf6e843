//! Structured logging setup, shared by every crate in the workspace.
//!
//! Mirrors the teacher's dual JSON/text subscriber: format is chosen by the
//! `LOG_FORMAT` environment variable (`json` or anything else for text),
//! level by `RUST_LOG` (defaulting to `info`).

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber for `service_name`. Safe to
/// call once at process start; a second call is a no-op error that callers
/// may ignore.
pub fn init_logging(service_name: &str) {
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => init_json_logging(service_name),
        _ => init_text_logging(service_name),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(service_name: &str) {
    let _ = fmt()
        .json()
        .with_env_filter(env_filter())
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .try_init();
    tracing::info!(service = service_name, format = "json", "logging initialized");
}

fn init_text_logging(service_name: &str) {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init();
    tracing::info!(service = service_name, format = "text", "logging initialized");
}

/// Convenience entry point for tests and examples that just want sane
/// defaults without consulting `LOG_FORMAT`.
pub fn init_default_logging(service_name: &str) {
    init_text_logging(service_name);
}
