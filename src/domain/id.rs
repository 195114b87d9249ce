//! Domain ID Types with NewType Pattern
//!
//! This module provides type-safe wrappers for domain identifiers to prevent
//! ID mixing errors at compile time. Each ID type implements Display, Debug,
//! Serialize, and Deserialize, and orders lexicographically so the snapshot
//! maps keyed by these types serialize deterministically.
//!
//! Generated identifiers carry their wire prefixes: `cli_` for client ids,
//! `enr_` for enrollment code ids, `sv_<N>` for secret versions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::random_token;

/// Macro to generate NewType ID wrappers with all required traits
macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from an existing string (for snapshot retrieval)
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Create an ID from a string slice
            pub fn from_str_unchecked(s: &str) -> Self {
                Self(s.to_string())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert to inner string value
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define all domain ID types
domain_id!(
    /// Identifier for a tenant; supplied by the admin surface
    TenantId
);

domain_id!(
    /// Identifier for a customer instance; supplied by the admin surface
    InstanceId
);

domain_id!(
    /// Client identifier bound to exactly one enrolled instance
    ClientId
);

domain_id!(
    /// Identifier for a secret version within one instance's credentials
    SecretVersionId
);

domain_id!(
    /// Identifier for an enrollment code record
    EnrollmentCodeId
);

impl ClientId {
    /// Allocate a fresh client identifier.
    pub fn generate() -> Self {
        Self(format!("cli_{}", random_token(24)))
    }
}

impl EnrollmentCodeId {
    /// Allocate a fresh enrollment code identifier.
    pub fn generate() -> Self {
        Self(format!("enr_{}", random_token(16)))
    }
}

impl SecretVersionId {
    /// The version installed by enrollment exchange.
    pub fn initial() -> Self {
        Self::from_number(1)
    }

    /// Build `sv_<N>` for a given version number.
    pub fn from_number(n: u64) -> Self {
        Self(format!("sv_{}", n))
    }

    /// Parse the numeric component of `sv_<N>`, if well-formed.
    pub fn number(&self) -> Option<u64> {
        self.0.strip_prefix("sv_")?.parse().ok()
    }
}
