//! Observability infrastructure for Drover.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and a span constructor used by every handler so
//! that log lines from one invocation share the same fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `drover_engine=debug`)
///
/// # Example
///
/// ```rust
/// use drover_core::observability::{LogFormat, init_logging};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a handler invocation with standard fields.
///
/// # Example
///
/// ```rust
/// use drover_core::observability::handler_span;
///
/// let span = handler_span("poll-external-job", "pA|rK");
/// let _guard = span.enter();
/// // ... handle the trigger
/// ```
#[must_use]
pub fn handler_span(handler: &str, request_id: &str) -> Span {
    tracing::info_span!(
        "handler",
        handler = handler,
        request_id = request_id,
    )
}
