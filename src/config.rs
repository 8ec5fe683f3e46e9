//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests allowed per window per identity (default: 100)
//! - `RATE_LIMIT_WINDOW_SECS`: Fixed window length (default: 3600)
//! - `RATE_LIMIT_SWEEP_SECS`: Interval for dropping expired keys (default: 300, 0 = never)
//!
//! # Identity
//!
//! - `IDENTITY_HEADER`: Header carrying the authenticated user id (default: `x-user-id`)
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set `X-Forwarded-For`

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::validation::DEFAULT_SENSITIVE_FIELDS;

/// Configuration errors raised at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("LOG_FORMAT must be 'text' or 'json', got '{0}'")]
    LogFormat(String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::LogFormat(other.to_string())),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    /// Allowed CORS origins; `*` allows any (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests allowed per identity per window (default: 100)
    pub rate_limit_max_requests: u32,

    /// Fixed window length (default: 1 hour)
    pub rate_limit_window: Duration,

    /// How often expired keys are swept from the store (default: 5 minutes).
    /// Zero disables the sweeper.
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Identity Configuration
    // =========================================================================
    /// Header set by the authenticating proxy with the user id
    pub identity_header: String,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources - NOT recommended for production)
    pub trusted_proxies: Vec<String>,

    /// Parameter name fragments redacted from request logs
    pub sensitive_fields: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Text or JSON log lines (default: text)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any value fails to parse or validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|| vec!["*".to_string()]),

            // Rate limiting
            rate_limit_max_requests: Self::parse_env("RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 3600)?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_SECS",
                300,
            )?),

            // Identity
            identity_header: env::var("IDENTITY_HEADER")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "x-user-id".to_string()),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES").unwrap_or_default(),
            sensitive_fields: Self::parse_list("SENSITIVE_FIELDS").unwrap_or_else(|| {
                DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect()
            }),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_default()
                .parse()?,
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for an empty quota, window or body limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::Zero("RATE_LIMIT_MAX_REQUESTS"));
        }

        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::Zero("RATE_LIMIT_WINDOW_SECS"));
        }

        if self.max_request_body_size == 0 {
            return Err(ConfigError::Zero("MAX_REQUEST_BODY_SIZE"));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweeper_enabled(&self) -> bool {
        !self.rate_limit_sweep_interval.is_zero()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    /// Comma-separated list, `None` when the variable is unset or blank.
    fn parse_list(name: &str) -> Option<Vec<String>> {
        env::var(name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(3600),
            rate_limit_sweep_interval: Duration::from_secs(300),
            identity_header: "x-user-id".to_string(),
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 0,
        }
    }
}
