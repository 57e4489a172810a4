use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE_URL: &str = "sqlite://stock_ledger.db?mode=rwc";
const DEFAULT_LEDGER_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_LEDGER_RETRY_BACKOFF_MS: u64 = 10;
const DEFAULT_LEDGER_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (sqlite:// or postgres://)
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Attempts per ledger operation before giving up with `Contention`
    #[serde(default = "default_ledger_max_attempts")]
    #[validate(range(min = 1, max = 100))]
    pub ledger_max_attempts: u32,

    /// Base backoff between optimistic retries; grows linearly per attempt
    #[serde(default = "default_ledger_retry_backoff_ms")]
    pub ledger_retry_backoff_ms: u64,

    /// Upper bound for one ledger operation, retries included
    #[serde(default = "default_ledger_operation_timeout_ms")]
    #[validate(custom = "validate_operation_timeout")]
    pub ledger_operation_timeout_ms: u64,

    /// Location given to stock records created without one
    #[serde(default)]
    #[validate(length(max = 100))]
    pub default_stock_location: String,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            ledger_max_attempts: default_ledger_max_attempts(),
            ledger_retry_backoff_ms: default_ledger_retry_backoff_ms(),
            ledger_operation_timeout_ms: default_ledger_operation_timeout_ms(),
            default_stock_location: String::new(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings::from(self)
    }
}

/// Tuning for the stock ledger's optimistic write loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSettings {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub operation_timeout: Duration,
    pub default_location: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LEDGER_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_LEDGER_RETRY_BACKOFF_MS),
            operation_timeout: Duration::from_millis(DEFAULT_LEDGER_OPERATION_TIMEOUT_MS),
            default_location: String::new(),
        }
    }
}

impl From<&AppConfig> for LedgerSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_attempts: cfg.ledger_max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.ledger_retry_backoff_ms),
            operation_timeout: Duration::from_millis(cfg.ledger_operation_timeout_ms),
            default_location: cfg.default_stock_location.clone(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_ledger_max_attempts() -> u32 {
    DEFAULT_LEDGER_MAX_ATTEMPTS
}
fn default_ledger_retry_backoff_ms() -> u64 {
    DEFAULT_LEDGER_RETRY_BACKOFF_MS
}
fn default_ledger_operation_timeout_ms() -> u64 {
    DEFAULT_LEDGER_OPERATION_TIMEOUT_MS
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_operation_timeout(timeout_ms: u64) -> Result<(), ValidationError> {
    if timeout_ms == 0 {
        let mut err = ValidationError::new("ledger_operation_timeout_ms");
        err.message = Some("ledger_operation_timeout_ms must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stock_ledger={0},stock_admin={0},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with an explicit config directory.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        assert!(cfg.validate().is_ok());

        let ledger = cfg.ledger_settings();
        assert_eq!(ledger.max_attempts, 5);
        assert_eq!(ledger.retry_backoff, Duration::from_millis(10));
        assert_eq!(ledger.operation_timeout, Duration::from_millis(5_000));
        assert_eq!(ledger, LedgerSettings::default());
    }

    #[test]
    fn invalid_values_are_reported_per_field() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), "test".into());
        cfg.log_level = "loud".into();
        cfg.ledger_max_attempts = 0;
        cfg.ledger_operation_timeout_ms = 0;

        let errors = cfg.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("log_level"));
        assert!(fields.contains_key("ledger_max_attempts"));
        assert!(fields.contains_key("ledger_operation_timeout_ms"));
    }

    #[test]
    fn config_files_are_layered() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default.toml",
            r#"
            database_url = "sqlite://from-default.db"
            ledger_max_attempts = 7
            default_stock_location = "A-01"
            "#,
        );

        // RUN_ENV is not set in the test environment, so only default.toml applies
        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.database_url, "sqlite://from-default.db");
        assert_eq!(cfg.ledger_max_attempts, 7);
        assert_eq!(cfg.ledger_settings().default_location, "A-01");
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "default.toml", r#"jwt_secret = "nope""#);
        assert!(matches!(
            load_config_from(dir.path()),
            Err(AppConfigError::Load(_))
        ));
    }
}
