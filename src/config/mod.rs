//! # Configuration Management
//!
//! This module provides configuration management for the auth control plane.
//! It supports multiple configuration sources including files and
//! environment variables.

pub mod settings;

pub use settings::{AppConfig, AuditSettings, DatabaseConfig, TokenSettings};

use crate::errors::{AuthPlaneError, Result};
use config::{Config, Environment, File};
use std::path::Path;

/// Load application configuration from multiple sources
///
/// Configuration is loaded in the following order (later sources override
/// earlier ones):
/// 1. Default values
/// 2. Configuration file (if specified)
/// 3. Environment variables with REZILIENT_ prefix
pub fn load_config<P: AsRef<Path>>(config_path: Option<P>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    // Add default configuration
    builder = builder.add_source(Config::try_from(&AppConfig::default())?);

    // Add configuration file if specified
    if let Some(path) = config_path {
        let path = path.as_ref();
        if path.exists() {
            builder = builder.add_source(File::from(path));
        } else {
            return Err(AuthPlaneError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
    }

    // Add environment variables with REZILIENT_ prefix
    builder = builder
        .add_source(Environment::with_prefix("REZILIENT").separator("__").try_parsing(true));

    // Build the configuration
    let config = builder.build()?;
    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate()?;

    Ok(app_config)
}
