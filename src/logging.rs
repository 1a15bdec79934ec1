//! Logging setup.
//!
//! Structured logging via `tracing`. The filter comes from the `CONFGEN_LOG`
//! environment variable when set, otherwise from the `--log-level` flag, and
//! defaults to `info`. Output goes to stdout in text or JSON format.

use crate::error::ConfigError;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize the global subscriber. Call once at startup.
pub fn init_logging(level: Option<&str>, format: &str) -> Result<(), ConfigError> {
    let filter = build_env_filter(level)?;
    let base = Registry::default().with(filter);

    match format {
        "json" => {
            base.with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .init();
        }
        "text" => {
            base.with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stdout),
            )
            .init();
        }
        other => {
            return Err(ConfigError::Invalid(format!(
                "invalid log format: {} (must be 'text' or 'json')",
                other
            )));
        }
    }

    Ok(())
}

fn build_env_filter(level: Option<&str>) -> Result<EnvFilter, ConfigError> {
    if let Some(level) = level {
        return level
            .parse::<EnvFilter>()
            .map_err(|e| ConfigError::Invalid(format!("invalid log level '{}': {}", level, e)));
    }

    if let Ok(filter) = EnvFilter::try_from_env("CONFGEN_LOG") {
        return Ok(filter);
    }

    Ok(EnvFilter::new("info"))
}
