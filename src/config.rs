//! Server configuration module
//! Loads startup parameters and throttle thresholds from the environment

use crate::constants::{
    CLEANUP_INTERVAL_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_PORT,
    DUPLICATE_WINDOW_MS, JOIN_LEAVE_INTERVAL_MS, MAX_ATTACHMENTS, MAX_CONNECTIONS_PER_USER,
    MAX_MESSAGE_LENGTH, PRESENCE_THROTTLE_MS, PRESENCE_TOGGLE_INTERVAL_MS,
    RATE_LIMIT_RETENTION_MARGIN_MS, TYPING_INTERVAL_MS,
};
use crate::error::{RelayError, Result};
use std::env;
use std::time::Duration;

/// Static limits and intervals, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    pub max_connections_per_user: usize,
    pub max_message_length: usize,
    pub max_attachments: usize,
    pub typing_interval: Duration,
    pub join_leave_interval: Duration,
    pub presence_toggle_interval: Duration,
    pub duplicate_window: Duration,
    pub presence_throttle: Duration,
    pub cleanup_interval: Duration,
    pub retention_margin: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_connections_per_user: MAX_CONNECTIONS_PER_USER,
            max_message_length: MAX_MESSAGE_LENGTH,
            max_attachments: MAX_ATTACHMENTS,
            typing_interval: Duration::from_millis(TYPING_INTERVAL_MS),
            join_leave_interval: Duration::from_millis(JOIN_LEAVE_INTERVAL_MS),
            presence_toggle_interval: Duration::from_millis(PRESENCE_TOGGLE_INTERVAL_MS),
            duplicate_window: Duration::from_millis(DUPLICATE_WINDOW_MS),
            presence_throttle: Duration::from_millis(PRESENCE_THROTTLE_MS),
            cleanup_interval: Duration::from_millis(CLEANUP_INTERVAL_MS),
            retention_margin: Duration::from_millis(RATE_LIMIT_RETENTION_MARGIN_MS),
        }
    }
}

impl Thresholds {
    /// Rate-limit entries older than this can no longer deny anything
    pub fn rate_limit_retention(&self) -> Duration {
        self.typing_interval
            .max(self.join_leave_interval)
            .max(self.presence_toggle_interval)
            + self.retention_margin
    }

    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let thresholds = Self {
            max_connections_per_user: env_parse(
                "RUSTY_RELAY_MAX_CONN_PER_USER",
                defaults.max_connections_per_user,
            ),
            max_message_length: env_parse(
                "RUSTY_RELAY_MAX_MESSAGE_LENGTH",
                defaults.max_message_length,
            ),
            max_attachments: env_parse("RUSTY_RELAY_MAX_ATTACHMENTS", defaults.max_attachments),
            typing_interval: env_millis("RUSTY_RELAY_TYPING_INTERVAL_MS", defaults.typing_interval),
            join_leave_interval: env_millis(
                "RUSTY_RELAY_JOIN_LEAVE_INTERVAL_MS",
                defaults.join_leave_interval,
            ),
            presence_toggle_interval: env_millis(
                "RUSTY_RELAY_PRESENCE_TOGGLE_INTERVAL_MS",
                defaults.presence_toggle_interval,
            ),
            duplicate_window: env_millis(
                "RUSTY_RELAY_DUPLICATE_WINDOW_MS",
                defaults.duplicate_window,
            ),
            presence_throttle: env_millis(
                "RUSTY_RELAY_PRESENCE_THROTTLE_MS",
                defaults.presence_throttle,
            ),
            cleanup_interval: env_millis(
                "RUSTY_RELAY_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval,
            ),
            retention_margin: defaults.retention_margin,
        };

        if thresholds.max_connections_per_user == 0 {
            return Err(RelayError::ConfigError(
                "RUSTY_RELAY_MAX_CONN_PER_USER must be at least 1".to_string(),
            ));
        }
        if thresholds.cleanup_interval.is_zero() {
            return Err(RelayError::ConfigError(
                "RUSTY_RELAY_CLEANUP_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        Ok(thresholds)
    }
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JWT secret for token validation
    pub jwt_secret: String,
    /// Upper bound on the authentication handshake
    pub handshake_timeout: Duration,
    pub thresholds: Thresholds,
}

impl ServerConfig {
    /// Create a test configuration - DANGEROUS: Only for testing!
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: "test-jwt-secret-only-for-unit-tests-never-use-in-production".to_string(),
            handshake_timeout: Duration::from_secs(2),
            thresholds: Thresholds::default(),
        }
    }

    /// Validate that a secret meets security requirements
    fn validate_secret(secret: &str) -> Result<()> {
        if secret.len() < 32 {
            return Err(RelayError::ConfigError(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // Check for insecure default or example values
        let insecure_patterns = [
            "your-secret-key",
            "change-this",
            "test-secret",
            "default",
            "password",
            "12345",
        ];

        for pattern in &insecure_patterns {
            if secret.contains(pattern) {
                return Err(RelayError::ConfigError(format!(
                    "JWT secret contains insecure pattern '{}'. Generate one with: openssl rand -base64 32",
                    pattern
                )));
            }
        }

        if secret.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RelayError::ConfigError(
                "JWT secret should contain mixed characters (letters, numbers, symbols)"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("RUSTY_RELAY_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env_parse("RUSTY_RELAY_PORT", DEFAULT_PORT);

        let jwt_secret = env::var("RUSTY_RELAY_JWT_SECRET")
            .or_else(|_| env::var("JWT_SECRET"))
            .map_err(|_| {
                RelayError::ConfigError(
                    "JWT_SECRET environment variable is required. \
                     Generate one with: openssl rand -base64 32"
                        .to_string(),
                )
            })?;
        Self::validate_secret(&jwt_secret)?;

        let handshake_timeout = env_millis(
            "RUSTY_RELAY_HANDSHAKE_TIMEOUT_MS",
            Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        );

        Ok(Self {
            host,
            port,
            jwt_secret,
            handshake_timeout,
            thresholds: Thresholds::from_env()?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
