//! Trigger authentication against a shared credential.
//!
//! Two methods are supported:
//! - `token`: a bearer token compared in constant time
//! - `hmac_sha256`: a GitHub-style `sha256=<hex>` signature over the raw
//!   request body, verified via the `hmac` crate (constant time)
//!
//! Authentication has no side effects and is never retried; a denied
//! request is rejected before any registry lookup.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{HookdError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The configured authentication method and its credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Token { token: String },
    HmacSha256 { secret: String },
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Token { .. } => "token",
            AuthMethod::HmacSha256 { .. } => "hmac_sha256",
        }
    }

    /// The configured credential, for startup validation only.
    pub(crate) fn credential(&self) -> &str {
        match self {
            AuthMethod::Token { token } => token,
            AuthMethod::HmacSha256 { secret } => secret,
        }
    }
}

/// Check a presented credential against the configured method.
///
/// `token` is the bearer credential from the request headers (with or
/// without a `Bearer ` prefix); `signature` is the hex signature header;
/// `body` is the raw request body the signature covers. Missing or empty
/// credentials are denied.
pub fn authorize(
    method: &AuthMethod,
    token: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<()> {
    match method {
        AuthMethod::Token { token: expected } => {
            let presented = token.ok_or(HookdError::Unauthorized)?;
            verify_token(expected, presented)
        }
        AuthMethod::HmacSha256 { secret } => {
            let sig = signature.ok_or(HookdError::Unauthorized)?;
            verify_signature(secret.as_bytes(), body, sig)
        }
    }
}

/// Constant-time bearer token comparison. Accepts an optional `Bearer `
/// prefix on the presented value.
pub fn verify_token(expected: &str, presented: &str) -> Result<()> {
    let presented = presented.strip_prefix("Bearer ").unwrap_or(presented);
    if presented.is_empty() {
        return Err(HookdError::Unauthorized);
    }
    if constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
        Ok(())
    } else {
        Err(HookdError::Unauthorized)
    }
}

/// Verify an HMAC-SHA256 body signature. Accepts an optional `sha256=`
/// prefix (GitHub webhook style).
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> Result<()> {
    let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex_decode(hex_sig).ok_or(HookdError::Unauthorized)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| HookdError::Unauthorized)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| HookdError::Unauthorized)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Constant-time byte comparison. Runtime is independent of how many
/// bytes match.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
