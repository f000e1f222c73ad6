//! Canonical request strings
//!
//! The canonical string is the exact text a client signs and the server
//! re-derives:
//!
//! ```text
//! {METHOD} {PATH}\n{TIMESTAMP}\n{hex(sha256(BODY))}
//! ```
//!
//! The body hash is taken over the raw bytes as received, so key order or
//! whitespace in a JSON body is part of what was signed.

use ed25519_dalek::SigningKey;

use crate::crypto::{sha256_hex, sign};

/// Build the canonical string for a request.
///
/// `path` may carry a query string; it is dropped. The method is upper-cased.
pub fn canonical_string(method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
    let path = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
    format!(
        "{} {}\n{}\n{}",
        method.to_ascii_uppercase(),
        path,
        timestamp,
        sha256_hex(body)
    )
}

/// Headers a client attaches to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub public_key: String,
    pub signature: String,
    pub timestamp: String,
}

/// Client-side helper: canonicalize and sign in one go.
pub fn sign_request(
    signing_key: &SigningKey,
    public_key: &str,
    method: &str,
    path: &str,
    timestamp: &str,
    body: &[u8],
) -> SignedHeaders {
    let canonical = canonical_string(method, path, timestamp, body);
    SignedHeaders {
        public_key: public_key.to_string(),
        signature: sign(signing_key, &canonical),
        timestamp: timestamp.to_string(),
    }
}
