//! # Error Handling
//!
//! This module provides error handling for the Rezilient auth control plane.
//! It defines custom error types using `thiserror` for all operations.
//!
//! Anticipated domain failures on the mint/validate/exchange paths are NOT
//! errors: those are carried as reason codes inside tagged result types (see
//! [`crate::domain::types`]). The variants here cover unexpected failures and
//! the typed registry/rotation preconditions the HTTP layer maps to reason
//! codes.

/// Custom result type for control plane operations
pub type Result<T> = std::result::Result<T, AuthPlaneError>;

/// Main error type for the auth control plane
#[derive(thiserror::Error, Debug)]
pub enum AuthPlaneError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Resource conflict errors (e.g., already exists)
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// Tenant lookup failed during a registry or token operation
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    /// Instance lookup failed during a registry or token operation
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Tenant id collision on create
    #[error("Tenant already exists: {0}")]
    TenantAlreadyExists(String),

    /// Instance id collision on create
    #[error("Instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Instance source collision on create (sources are globally unique)
    #[error("Source mapping already exists: {0}")]
    SourceMappingAlreadyExists(String),

    /// A dual-secret rotation is already in progress for the instance
    #[error("Secret rotation already in progress for instance: {0}")]
    RotationAlreadyInProgress(String),

    /// Rotation completion requires the next secret to have been adopted
    #[error("Secret rotation not adopted for instance: {0}")]
    SecretRotationNotAdopted(String),
}

/// Alias kept for call sites that prefer the short name
pub type Error = AuthPlaneError;

impl AuthPlaneError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a new database error
    pub fn database(source: sqlx::Error, context: String) -> Self {
        Self::Database { source, context }
    }

    /// Create a serialization error with custom context
    pub fn serialization<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::Serialization { source, context: context.into() }
    }

    /// The stable reason code the HTTP layer reports for precondition
    /// failures, when one exists.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::TenantNotFound(_) => Some("tenant_not_found"),
            Self::InstanceNotFound(_) => Some("instance_not_found"),
            Self::TenantAlreadyExists(_) => Some("tenant_already_exists"),
            Self::InstanceAlreadyExists(_) => Some("instance_already_exists"),
            Self::SourceMappingAlreadyExists(_) => Some("source_mapping_already_exists"),
            Self::RotationAlreadyInProgress(_) => Some("rotation_already_in_progress"),
            Self::SecretRotationNotAdopted(_) => Some("secret_rotation_not_adopted"),
            _ => None,
        }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config { .. } => 500,
            Self::Database { .. } => 500,
            Self::Serialization { .. } => 400,
            Self::Validation { .. } => 400,
            Self::Internal { .. } => 500,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::TenantNotFound(_) | Self::InstanceNotFound(_) => 404,
            Self::TenantAlreadyExists(_)
            | Self::InstanceAlreadyExists(_)
            | Self::SourceMappingAlreadyExists(_)
            | Self::RotationAlreadyInProgress(_) => 409,
            Self::SecretRotationNotAdopted(_) => 409,
        }
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for AuthPlaneError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<serde_json::Error> for AuthPlaneError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for AuthPlaneError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for AuthPlaneError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
