//! Compact token claims.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::ServiceScope;

/// Claims carried by a minted token.
///
/// `iss`, `sub`, `aud`, `jti` are strings; `iat`/`exp` are whole seconds
/// since the Unix epoch; `service_scope` must be a known scope. The
/// tenant/instance/source claims describe the enrolled instance the token
/// was minted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub service_scope: ServiceScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TokenClaims {
    /// Strictly-typed extraction from a decoded payload.
    ///
    /// Returns `None` when any required claim is missing, has the wrong
    /// JSON type, or names an unknown service scope; validation reports
    /// that as a malformed token.
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        let iss = required_string(payload, "iss")?;
        let sub = required_string(payload, "sub")?;
        let aud = required_string(payload, "aud")?;
        let jti = required_string(payload, "jti")?;
        let iat = payload.get("iat")?.as_i64()?;
        let exp = payload.get("exp")?.as_i64()?;
        let service_scope = required_string(payload, "service_scope")?.parse::<ServiceScope>().ok()?;

        Some(Self {
            iss,
            sub,
            aud,
            jti,
            iat,
            exp,
            service_scope,
            tenant_id: optional_string(payload, "tenant_id"),
            instance_id: optional_string(payload, "instance_id"),
            source: optional_string(payload, "source"),
        })
    }
}

fn required_string(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_string)
}

fn optional_string(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}
