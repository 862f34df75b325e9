//! # Configuration
//!
//! Settings for the database, pricing tolerance, stock reports and retries.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     RXSTOCK_DB_PATH=/srv/rxstock/rxstock.db                            │
//! │     RXSTOCK_BUSY_TIMEOUT_MS=5000                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/rxstock/rxstock.toml (Linux)                             │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "rxstock.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [pricing]
//! default_margin_bps = 2000
//! price_tolerance_cents = 1
//!
//! [stock]
//! near_expiry_days = 90
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

// =============================================================================
// Errors
// =============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path of the SQLite file. Created if missing.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the database lock before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("rxstock.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
            run_migrations: true,
        }
    }
}

/// `[pricing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSettings {
    /// Margin over PTR applied when no pricing rule matches (2000 = 20%).
    #[serde(default = "default_margin_bps")]
    pub default_margin_bps: u32,

    /// Allowed difference between requested and expected unit price.
    #[serde(default = "default_tolerance")]
    pub price_tolerance_cents: i64,
}

fn default_margin_bps() -> u32 {
    rxstock_core::pricing::DEFAULT_MARGIN_BPS
}

fn default_tolerance() -> i64 {
    rxstock_core::pricing::DEFAULT_TOLERANCE_CENTS
}

impl Default for PricingSettings {
    fn default() -> Self {
        PricingSettings {
            default_margin_bps: default_margin_bps(),
            price_tolerance_cents: default_tolerance(),
        }
    }
}

/// `[stock]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSettings {
    /// Window of the near-expiry report.
    #[serde(default = "default_near_expiry_days")]
    pub near_expiry_days: i64,
}

fn default_near_expiry_days() -> i64 {
    90
}

impl Default for StockSettings {
    fn default() -> Self {
        StockSettings {
            near_expiry_days: default_near_expiry_days(),
        }
    }
}

/// `[retry]` section, used by callers that re-run workflows on lock contention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    50
}

fn default_max_backoff() -> u64 {
    1_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete rxstock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RxConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,

    #[serde(default)]
    pub stock: StockSettings,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl RxConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (rxstock.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document. Missing sections take their defaults.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.pricing.price_tolerance_cents < 0 {
            return Err(ConfigError::Invalid(
                "pricing.price_tolerance_cents must not be negative".into(),
            ));
        }

        if self.stock.near_expiry_days <= 0 {
            return Err(ConfigError::Invalid(
                "stock.near_expiry_days must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RXSTOCK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("RXSTOCK_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(m) => self.database.max_connections = m,
                Err(_) => warn!(value = %max, "Ignoring invalid RXSTOCK_MAX_CONNECTIONS"),
            }
        }

        if let Ok(ms) = std::env::var("RXSTOCK_BUSY_TIMEOUT_MS") {
            match ms.parse::<u64>() {
                Ok(v) => self.database.busy_timeout_ms = v,
                Err(_) => warn!(value = %ms, "Ignoring invalid RXSTOCK_BUSY_TIMEOUT_MS"),
            }
        }

        if let Ok(bps) = std::env::var("RXSTOCK_DEFAULT_MARGIN_BPS") {
            if let Ok(v) = bps.parse::<u32>() {
                self.pricing.default_margin_bps = v;
            }
        }

        if let Ok(cents) = std::env::var("RXSTOCK_PRICE_TOLERANCE_CENTS") {
            if let Ok(v) = cents.parse::<i64>() {
                self.pricing.price_tolerance_cents = v;
            }
        }

        if let Ok(days) = std::env::var("RXSTOCK_NEAR_EXPIRY_DAYS") {
            if let Ok(v) = days.parse::<i64>() {
                self.stock.near_expiry_days = v;
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rxstock", "rxstock")
            .map(|dirs| dirs.config_dir().join("rxstock.toml"))
    }
}

// =============================================================================
// Tracing
// =============================================================================

/// Installs the global tracing subscriber.
///
/// Honours `RUST_LOG`; falls back to `info`. Calling it twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// =============================================================================
// Unit Tests
// =============================================================================
