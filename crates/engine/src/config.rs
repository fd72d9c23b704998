//! Engine configuration
//!
//! Loaded from environment variables. Binaries call `dotenvy::dotenv()` first so
//! a local `.env` file is honored.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default bound for a single delivery attempt
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 5;

/// Billing period applied to recurring approvals when the platform supplies none
pub const DEFAULT_BILLING_PERIOD_DAYS: i64 = 30;

/// Longest billing period honored from a payload or configuration (ten years)
pub const MAX_BILLING_PERIOD_DAYS: i64 = 3660;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Troubleshooting assistant settings
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Disabled when absent
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub delivery_timeout: Duration,
    pub default_billing_period_days: i64,
    /// Directory for per-owner JSON snapshots. In-memory only when unset.
    pub data_dir: Option<PathBuf>,
    pub assistant: AssistantConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
            default_billing_period_days: DEFAULT_BILLING_PERIOD_DAYS,
            data_dir: None,
            assistant: AssistantConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let delivery_timeout_secs = parse_env(
            "DELIVERY_TIMEOUT_SECS",
            DEFAULT_DELIVERY_TIMEOUT_SECS,
        )?;
        if delivery_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DELIVERY_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let default_billing_period_days =
            parse_env("DEFAULT_BILLING_PERIOD_DAYS", DEFAULT_BILLING_PERIOD_DAYS)?;
        if !(1..=MAX_BILLING_PERIOD_DAYS).contains(&default_billing_period_days) {
            return Err(ConfigError::InvalidValue {
                key: "DEFAULT_BILLING_PERIOD_DAYS",
                value: default_billing_period_days.to_string(),
            });
        }

        let data_dir = non_empty_env("DATA_DIR").map(PathBuf::from);

        let assistant = AssistantConfig {
            api_key: non_empty_env("GEMINI_API_KEY"),
            model: non_empty_env("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: non_empty_env("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        };

        if assistant.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set - troubleshooting assistant disabled");
        }

        Ok(Self {
            delivery_timeout: Duration::from_secs(delivery_timeout_secs),
            default_billing_period_days,
            data_dir,
            assistant,
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_env(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
