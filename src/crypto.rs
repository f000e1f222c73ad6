//! Cryptographic operations for the identity core
//!
//! Parses `"{payload}:{algorithm}"` public keys, verifies and produces
//! Ed25519 signatures, and generates key pairs for client tooling.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// The only algorithm tag accepted today
pub const ED25519_TAG: &str = "ed25519";

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Crypto operation errors. Never sent to clients.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid public key format: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature format: {0}")]
    InvalidSignature(String),
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Parsed public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPublicKey {
    Ed25519(VerifyingKey),
}

/// Parse `"{base64-or-hex payload}:{algorithm}"`
pub fn parse_public_key(text: &str) -> CryptoResult<ParsedPublicKey> {
    let (payload, algorithm) = text
        .rsplit_once(':')
        .ok_or_else(|| CryptoError::InvalidPublicKey("missing algorithm tag".into()))?;

    match algorithm {
        ED25519_TAG => parse_ed25519_payload(payload),
        other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    }
}

fn parse_ed25519_payload(payload: &str) -> CryptoResult<ParsedPublicKey> {
    let key_bytes = decode_key_payload(payload)?;

    let key_array: [u8; 32] = key_bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::InvalidPublicKey(format!("Ed25519 key must be 32 bytes, got {}", b.len()))
    })?;

    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;

    Ok(ParsedPublicKey::Ed25519(verifying_key))
}

/// 64 hex digits are read as hex, anything else as standard base64.
fn decode_key_payload(payload: &str) -> CryptoResult<Vec<u8>> {
    if payload.len() == 64 && payload.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(payload).map_err(|e| CryptoError::Decode(e.to_string()));
    }
    BASE64
        .decode(payload)
        .map_err(|e| CryptoError::Decode(e.to_string()))
}

/// Verify a signature against a message
pub fn verify_signature(
    public_key: &ParsedPublicKey,
    message: &[u8],
    signature_b64: &str,
) -> CryptoResult<()> {
    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    match public_key {
        ParsedPublicKey::Ed25519(key) => {
            let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|b: Vec<u8>| {
                CryptoError::InvalidSignature(format!(
                    "Ed25519 signature must be 64 bytes, got {}",
                    b.len()
                ))
            })?;
            let signature = Ed25519Signature::from_bytes(&sig_array);

            key.verify(message, &signature)
                .map_err(|_| CryptoError::VerificationFailed)?;
        }
    }

    Ok(())
}

/// Parse the key and verify in one step, keeping the failure reason.
pub fn verify_detailed(public_key: &str, message: &str, signature_b64: &str) -> CryptoResult<()> {
    let parsed = parse_public_key(public_key)?;
    verify_signature(&parsed, message.as_bytes(), signature_b64)
}

/// Fail-closed verification. Malformed keys, undecodable signatures and
/// wrong signatures are indistinguishable to the caller.
pub fn verify(public_key: &str, message: &str, signature_b64: &str) -> bool {
    match verify_detailed(public_key, message, signature_b64) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Signature rejected: {}", e);
            false
        }
    }
}

/// Sign a message, returning a base64 signature
pub fn sign(signing_key: &SigningKey, message: &str) -> String {
    BASE64.encode(signing_key.sign(message.as_bytes()).to_bytes())
}

/// Fresh key pair from the OS random source
pub fn generate_keypair() -> (SigningKey, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key = format_public_key(&signing_key.verifying_key());
    (signing_key, public_key)
}

/// Render a verifying key in the `"{base64}:ed25519"` wire form
pub fn format_public_key(key: &VerifyingKey) -> String {
    format!("{}:{}", BASE64.encode(key.as_bytes()), ED25519_TAG)
}

/// Re-encode a key in its one stored form. Hex and base64 spellings of the
/// same key normalize to the same text.
pub fn normalize_public_key(text: &str) -> CryptoResult<String> {
    match parse_public_key(text)? {
        ParsedPublicKey::Ed25519(key) => Ok(format_public_key(&key)),
    }
}

/// Compute SHA256 hash of data (hex encoded)
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_verify() {
        let (signing_key, public_key) = generate_keypair();
        let message = "test message";

        let sig = sign(&signing_key, message);
        assert!(verify(&public_key, message, &sig));

        // Wrong message should fail
        assert!(!verify(&public_key, "wrong message", &sig));
    }

    #[test]
    fn test_round_trip_many_messages() {
        for i in 0..16 {
            let (signing_key, public_key) = generate_keypair();
            let message = format!("POST /writes/post\n2026-01-01T00:00:00Z\n{}", i);
            assert!(verify(&public_key, &message, &sign(&signing_key, &message)));
        }
    }

    #[test]
    fn test_tamper_message_bytes() {
        let (signing_key, public_key) = generate_keypair();
        let message = "GET /me\n2026-03-01T12:00:00Z\nabc";
        let sig = sign(&signing_key, message);

        let bytes = message.as_bytes();
        for i in 0..bytes.len() {
            let mut tampered = bytes.to_vec();
            tampered[i] ^= 0x01;
            let tampered = String::from_utf8_lossy(&tampered).into_owned();
            assert!(!verify(&public_key, &tampered, &sig), "byte {} flip passed", i);
        }
    }

    #[test]
    fn test_tamper_signature_bytes() {
        let (signing_key, public_key) = generate_keypair();
        let message = "GET /me\n2026-03-01T12:00:00Z\nabc";
        let sig_bytes = BASE64
            .decode(sign(&signing_key, message))
            .unwrap();

        for i in 0..sig_bytes.len() {
            let mut tampered = sig_bytes.clone();
            tampered[i] ^= 0x01;
            assert!(!verify(&public_key, message, &BASE64.encode(&tampered)));
        }
    }

    #[test]
    fn test_tamper_public_key_bytes() {
        let (signing_key, public_key) = generate_keypair();
        let message = "GET /me\n2026-03-01T12:00:00Z\nabc";
        let sig = sign(&signing_key, message);
        let key_bytes = signing_key.verifying_key().to_bytes();

        for i in 0..key_bytes.len() {
            let mut tampered = key_bytes;
            tampered[i] ^= 0x01;
            let tampered_key = format!("{}:ed25519", BASE64.encode(tampered));
            assert_ne!(tampered_key, public_key);
            assert!(!verify(&tampered_key, message, &sig));
        }
    }

    #[test]
    fn test_hex_payload_accepted() {
        let (signing_key, _) = generate_keypair();
        let hex_key = format!(
            "{}:ed25519",
            hex::encode(signing_key.verifying_key().as_bytes())
        );
        let sig = sign(&signing_key, "hello");
        assert!(verify(&hex_key, "hello", &sig));
    }

    #[test]
    fn test_hex_and_base64_normalize_alike() {
        let (signing_key, public_key) = generate_keypair();
        let hex_key = format!(
            "{}:ed25519",
            hex::encode(signing_key.verifying_key().as_bytes())
        );

        assert_ne!(hex_key, public_key);
        assert_eq!(normalize_public_key(&hex_key).unwrap(), public_key);
        assert_eq!(normalize_public_key(&public_key).unwrap(), public_key);
        assert!(normalize_public_key("AAAA:ed25519").is_err());
        assert!(normalize_public_key("k1").is_err());
    }

    #[test]
    fn test_unsupported_algorithm_fails_closed() {
        let (signing_key, public_key) = generate_keypair();
        let payload = public_key.trim_end_matches(":ed25519");
        let sig = sign(&signing_key, "hello");

        for tag in ["rsa", "ED25519", "", "none"] {
            let key = format!("{}:{}", payload, tag);
            assert!(!verify(&key, "hello", &sig));
        }
        assert!(matches!(
            parse_public_key(&format!("{}:rsa", payload)),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            parse_public_key(payload),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_garbage_input_never_panics() {
        assert!(!verify("", "", ""));
        assert!(!verify(":ed25519", "m", "!!!"));
        assert!(!verify("AAAA:ed25519", "m", "AAAA"));
        let (_, public_key) = generate_keypair();
        assert!(!verify(&public_key, "m", "not base64 at all"));
        assert!(!verify(&public_key, "m", &BASE64.encode([0u8; 10])));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_keypairs_differ() {
        let (_, a) = generate_keypair();
        let (_, b) = generate_keypair();
        assert_ne!(a, b);
    }
}
