//! # Configuration Settings
//!
//! Defines the configuration structure for the auth control plane.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::errors::{AuthPlaneError, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Token signing and validation configuration
    #[validate(nested)]
    pub token: TokenSettings,

    /// Audit stream configuration
    #[validate(nested)]
    pub audit: AuditSettings,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(AuthPlaneError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Custom validation logic that goes beyond what the validator crate can do
    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite://") {
            return Err(AuthPlaneError::validation("Database URL must start with 'sqlite://'"));
        }

        if self.token.signing_key.len() < 32 {
            return Err(AuthPlaneError::validation(
                "Token signing key must be at least 32 characters long",
            ));
        }

        if self.token.token_ttl_seconds == 0 {
            return Err(AuthPlaneError::validation("Token TTL must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AuthPlaneError::validation(
                "min_connections cannot be greater than max_connections",
            ));
        }

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, message = "max_connections must be at least 1"))]
    pub max_connections: u32,

    /// Minimum number of idle connections to keep
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub connect_timeout_seconds: u64,

    /// Idle connection timeout in seconds (None disables the reaper)
    pub idle_timeout_seconds: Option<u64>,

    /// Run migrations automatically when the pool is created
    pub auto_migrate: bool,

    /// Snapshot row key; multiple control planes can multiplex one database
    #[validate(length(min = 1, message = "Snapshot key cannot be empty"))]
    pub snapshot_key: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rezilient-auth.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            auto_migrate: true,
            snapshot_key: "control-plane".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Get the connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the idle timeout as a Duration, if configured
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_seconds.map(Duration::from_secs)
    }
}

/// Token signing and validation configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TokenSettings {
    /// Issuer claim stamped into and required from every token
    #[validate(length(min = 1, message = "Issuer cannot be empty"))]
    pub issuer: String,

    /// HMAC-SHA256 signing key. The default is a development placeholder;
    /// override it in any real deployment.
    pub signing_key: String,

    /// Lifetime of minted tokens in seconds
    pub token_ttl_seconds: u64,

    /// Clock skew tolerated when checking expiry
    pub token_clock_skew_seconds: u64,

    /// Grace window for in-flight refresh attempts while outage mode is active
    pub outage_grace_window_seconds: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "rezilient-auth".to_string(),
            signing_key: "insecure-dev-signing-key-0123456789abcdef".to_string(),
            token_ttl_seconds: 300,
            token_clock_skew_seconds: 30,
            outage_grace_window_seconds: 420,
        }
    }
}

/// Audit stream configuration
///
/// The redaction rule is concept-based: any metadata key whose lowercase form
/// contains one of `sensitive_key_substrings` is replaced with `[REDACTED]`,
/// except keys ending in `version_id_allowlist_suffix`, whose values are
/// version identifiers rather than secrets.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuditSettings {
    /// Origin tag stamped into normalized cross-service events
    #[validate(length(min = 1, message = "Origin service cannot be empty"))]
    pub origin_service: String,

    /// Case-insensitive substrings marking a metadata key as sensitive
    #[validate(length(min = 1, message = "At least one sensitive substring is required"))]
    pub sensitive_key_substrings: Vec<String>,

    /// Keys ending in this suffix carry version identifiers and pass through
    pub version_id_allowlist_suffix: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            origin_service: "auth-control-plane".to_string(),
            sensitive_key_substrings: vec![
                "secret".to_string(),
                "enrollment_code".to_string(),
                "token".to_string(),
            ],
            version_id_allowlist_suffix: "secret_version_id".to_string(),
        }
    }
}
