//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which services this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRole {
    /// Ledger RPCs and direct account operations only
    Ledger,
    /// Transfer coordinator talking to a remote ledger
    Transfer,
    /// Both, with the coordinator calling the ledger in-process
    Standalone,
}

impl AppRole {
    pub fn runs_ledger(&self) -> bool {
        matches!(self, AppRole::Ledger | AppRole::Standalone)
    }

    pub fn runs_transfer(&self) -> bool {
        matches!(self, AppRole::Transfer | AppRole::Standalone)
    }
}

impl FromStr for AppRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ledger" => Ok(AppRole::Ledger),
            "transfer" => Ok(AppRole::Transfer),
            "standalone" => Ok(AppRole::Standalone),
            _ => Err(ConfigError::InvalidValue("APP_ROLE")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: AppRole,

    /// Database connection URL; in-memory stores when absent
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Ledger base URL used by the transfer role
    pub ledger_url: String,

    pub notification_url: Option<String>,

    /// Remote token validation endpoint
    pub auth_url: Option<String>,

    /// Accepted bearer tokens (hashed on load by the authorizer)
    pub auth_tokens: Vec<String>,

    /// Credential presented to the ledger by the transfer role
    pub service_token: Option<String>,

    pub call_timeout: Duration,
    pub commit_max_attempts: u32,
    pub commit_retry_backoff: Duration,

    /// Age after which PENDING branches and open sagas count as stuck
    pub pending_grace_period: Duration,

    pub recovery_scan_interval: Duration,

    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let role: AppRole = env::var("APP_ROLE")
            .unwrap_or_else(|_| "standalone".to_string())
            .parse()?;

        let database_url = optional("DATABASE_URL");
        let database_max_connections = parsed("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parsed("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let ledger_url =
            env::var("LEDGER_URL").unwrap_or_else(|_| "http://127.0.0.1:3001".to_string());

        let auth_tokens = env::var("AUTH_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let config = Self {
            role,
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            ledger_url,
            notification_url: optional("NOTIFICATION_URL"),
            auth_url: optional("AUTH_URL"),
            auth_tokens,
            service_token: optional("SERVICE_TOKEN"),
            call_timeout: Duration::from_millis(parsed("CALL_TIMEOUT_MS", 5000)?),
            commit_max_attempts: parsed("COMMIT_MAX_ATTEMPTS", 5)?,
            commit_retry_backoff: Duration::from_millis(parsed("COMMIT_RETRY_BACKOFF_MS", 100)?),
            pending_grace_period: Duration::from_secs(parsed("PENDING_GRACE_PERIOD_SECS", 300)?),
            recovery_scan_interval: Duration::from_secs(parsed(
                "RECOVERY_SCAN_INTERVAL_SECS",
                30,
            )?),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.commit_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("COMMIT_MAX_ATTEMPTS"));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("CALL_TIMEOUT_MS"));
        }
        if self.is_production() && self.auth_url.is_none() && self.auth_tokens.is_empty() {
            return Err(ConfigError::MissingEnv("AUTH_TOKENS"));
        }
        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("ledger".parse::<AppRole>().unwrap(), AppRole::Ledger);
        assert_eq!("Transfer".parse::<AppRole>().unwrap(), AppRole::Transfer);
        assert!("gateway".parse::<AppRole>().is_err());

        assert!(AppRole::Standalone.runs_ledger());
        assert!(AppRole::Standalone.runs_transfer());
        assert!(!AppRole::Ledger.runs_transfer());
        assert!(!AppRole::Transfer.runs_ledger());
    }

    #[test]
    fn test_production_requires_auth() {
        let mut config = Config {
            role: AppRole::Standalone,
            database_url: None,
            database_max_connections: 10,
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "production".to_string(),
            ledger_url: "http://127.0.0.1:3001".to_string(),
            notification_url: None,
            auth_url: None,
            auth_tokens: Vec::new(),
            service_token: None,
            call_timeout: Duration::from_secs(5),
            commit_max_attempts: 5,
            commit_retry_backoff: Duration::from_millis(100),
            pending_grace_period: Duration::from_secs(300),
            recovery_scan_interval: Duration::from_secs(30),
            log_json: false,
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEnv("AUTH_TOKENS"))));

        config.auth_tokens = vec!["secret".to_string()];
        assert!(config.validate().is_ok());

        config.commit_max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
