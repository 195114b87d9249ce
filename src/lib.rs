//! # Rezilient Auth Control Plane
//!
//! Multi-tenant authentication control plane that issues, rotates, and
//! validates short-lived bearer tokens for the REG and RRS downstream
//! services on behalf of enrolled customer instances.
//!
//! ## Architecture
//!
//! ```text
//! Admin input → Registry / Enrollment → client credentials
//!      Clients → Token mint/validate → signed compact tokens
//!                       ↓
//!          State Store (single snapshot)  +  Audit stream
//! ```
//!
//! ## Core Components
//!
//! - **Registry**: tenant, instance, and credential lifecycle
//! - **Enrollment**: one-time codes exchanged for initial client credentials
//! - **Rotation**: dual-secret overlap rotation (start / adopt / complete / revoke)
//! - **Token**: mint decision matrix, validation, outage mode, in-flight
//!   entitlement evaluation
//! - **State Store**: serializable read-modify-write transactions over one
//!   durable JSON snapshot (SQLite by default, in-memory for tests)
//! - **Audit**: append-only event stream with metadata sanitization and a
//!   normalized cross-service projection

pub mod audit;
pub mod clock;
pub mod config;
pub mod control_plane;
pub mod crypto;
pub mod domain;
pub mod enrollment;
pub mod errors;
pub mod registry;
pub mod rotation;
pub mod storage;
pub mod token;

// Re-export commonly used types and traits
pub use config::AppConfig;
pub use control_plane::ControlPlane;
pub use errors::{AuthPlaneError, Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
