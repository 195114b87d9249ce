//! Crypto primitives shared across the control plane.
//!
//! Everything here is synchronous and CPU-bound: SHA-256 hex digests for
//! secret and enrollment-code material, constant-time digest comparison,
//! URL-safe random token generation, and HMAC-SHA256 sign/verify for the
//! compact three-segment token format.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::{AuthPlaneError, Result};

type HmacSha256 = Hmac<Sha256>;

/// URL-safe alphabet used for generated identifiers and secrets. No padding
/// characters, safe to embed in URLs and headers as-is.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Lowercase hex SHA-256 digest of the input.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time equality over two hex digests.
///
/// Length differences short-circuit; the digests compared here are always
/// fixed-width SHA-256 hex strings, so the length itself is not secret.
pub fn constant_time_hex_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random token over the URL-safe alphabet, `len` characters long.
pub fn random_token(len: usize) -> String {
    let mut rng = OsRng;
    (0..len).map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char).collect()
}

/// Failure modes of compact-token verification, ordered the way the
/// validation path checks them: structural problems first, then the
/// signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactTokenError {
    /// Wrong segment count, undecodable base64url, or a payload that is not
    /// a JSON object.
    Malformed,
    /// Structure is fine but the HMAC does not match.
    InvalidSignature,
}

/// Sign `header` and `payload` into a compact three-segment token:
/// `base64url(header).base64url(payload).base64url(HMAC-SHA256)`.
pub fn sign_compact(header: &Value, payload: &Value, key: &[u8]) -> Result<String> {
    let header_json = serde_json::to_vec(header)
        .map_err(|err| AuthPlaneError::serialization(err, "Failed to encode token header"))?;
    let payload_json = serde_json::to_vec(payload)
        .map_err(|err| AuthPlaneError::serialization(err, "Failed to encode token payload"))?;

    let signing_input =
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header_json), URL_SAFE_NO_PAD.encode(payload_json));

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| AuthPlaneError::internal(format!("Failed to initialize HMAC: {}", err)))?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Verify a compact token and return its payload object.
///
/// Checks run structural-first: segment count, base64url decoding, payload
/// JSON shape, then the HMAC over the first two segments exactly as
/// transmitted.
pub fn verify_compact(
    token: &str,
    key: &[u8],
) -> std::result::Result<Map<String, Value>, CompactTokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(CompactTokenError::Malformed);
    }

    // Header bytes must decode even though only the payload is consumed.
    URL_SAFE_NO_PAD.decode(segments[0]).map_err(|_| CompactTokenError::Malformed)?;
    let payload_bytes =
        URL_SAFE_NO_PAD.decode(segments[1]).map_err(|_| CompactTokenError::Malformed)?;
    let signature =
        URL_SAFE_NO_PAD.decode(segments[2]).map_err(|_| CompactTokenError::Malformed)?;

    let payload: Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| CompactTokenError::Malformed)?;
    let payload = match payload {
        Value::Object(map) => map,
        _ => return Err(CompactTokenError::Malformed),
    };

    let signing_input = format!("{}.{}", segments[0], segments[1]);
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| CompactTokenError::InvalidSignature)?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature).map_err(|_| CompactTokenError::InvalidSignature)?;

    Ok(payload)
}
