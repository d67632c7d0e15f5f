//! Structured logging infrastructure for PcrBind.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.
//! Security-relevant rejections are emitted under the [`SECURITY_TARGET`]
//! target so they can be filtered or routed separately.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Tracing target used for security events (rejections, replays, tampering).
pub const SECURITY_TARGET: &str = "pcrbind::security";

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system from configuration.
///
/// `RUST_LOG` overrides the configured level. Returns an error if a global
/// subscriber is already installed.
///
/// # Example
/// ```no_run
/// use pcrbind_core::{logging, Config};
///
/// let config = Config::default_config();
/// logging::init(&config.logging).expect("logging already initialized");
/// tracing::info!("verifier started");
/// ```
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = build_filter(&config.level);
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init(),
    }
}

/// Initialize the logging system with JSON output at `info` level.
///
/// This format is suitable for log aggregation systems and structured log analysis.
pub fn init_json() -> Result<(), tracing_subscriber::util::TryInitError> {
    init(&LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Json,
    })
}
