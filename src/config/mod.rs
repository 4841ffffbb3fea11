//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` to
//! keep it out of logs.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::fanout::RecipientScope;
use crate::telemetry::TelemetryConfig;

pub use secrecy::ExposeSecret;

pub const DEFAULT_DEPARTMENTS_FILE: &str = "departments.toml";
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// TOML list of departments used by `departments sync`.
    pub departments_file: PathBuf,
    pub notify_scope: RecipientScope,
    /// Message ids remembered per subscriber connection.
    pub dedup_window: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let notify_scope = match optional_var("NOTIFY_SCOPE") {
            Some(raw) => raw.parse()?,
            None => RecipientScope::default(),
        };
        let dedup_window = match optional_var("DEDUP_WINDOW") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    Error::Config(format!("DEDUP_WINDOW must be a positive integer, got {raw:?}"))
                })?,
            None => DEFAULT_DEDUP_WINDOW,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            departments_file: optional_var("DEPARTMENTS_FILE")
                .unwrap_or_else(|| DEFAULT_DEPARTMENTS_FILE.to_string())
                .into(),
            notify_scope,
            dedup_window,
        })
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig::new(self.otel_endpoint.clone(), self.log_level.clone())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and empty are the same thing.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
