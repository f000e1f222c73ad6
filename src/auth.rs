//! Request authentication
//!
//! Every authenticated request carries `X-Public-Key`, `X-Signature` and
//! `X-Timestamp`. The pipeline is: canonicalize, verify the signature,
//! check freshness, then resolve the key to an active identity. There are
//! no API keys; the signature is the credential.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};

use crate::canonical::canonical_string;
use crate::crypto::{normalize_public_key, verify};
use crate::error::{ApiError, ApiResult};
use crate::replay::{check_skew, parse_timestamp, ReplayCache, MAX_SKEW_CAP_SECS};
use crate::resolver::resolve;
use crate::store::IdentityStore;
use crate::types::{AuthContext, IdentityPublic};

pub const HEADER_PUBLIC_KEY: &str = "x-public-key";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// The parts of an inbound request that take part in signing
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    /// Path as received; any query string is ignored
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    /// Raw body bytes, before any JSON parsing
    pub body: &'a [u8],
}

/// Raw authentication header values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub public_key: String,
    pub signature: String,
    pub timestamp: String,
}

/// A request whose signature and freshness checked out
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub public_key: String,
    pub canonical: String,
    pub timestamp: DateTime<Utc>,
}

/// Pull the three auth headers. `Ok(None)` when none is present; a partial
/// set is `MissingAuth`.
pub fn extract_auth_headers(headers: &HeaderMap) -> ApiResult<Option<AuthHeaders>> {
    let read = |name: &str| -> ApiResult<Option<String>> {
        headers
            .get(name)
            .map(|v| {
                v.to_str()
                    .map(|s| s.trim().to_string())
                    .map_err(|_| ApiError::malformed(format!("Header {} is not valid text", name)))
            })
            .transpose()
    };

    match (
        read(HEADER_PUBLIC_KEY)?,
        read(HEADER_SIGNATURE)?,
        read(HEADER_TIMESTAMP)?,
    ) {
        (None, None, None) => Ok(None),
        (Some(public_key), Some(signature), Some(timestamp))
            if !public_key.is_empty() && !signature.is_empty() && !timestamp.is_empty() =>
        {
            Ok(Some(AuthHeaders {
                public_key,
                signature,
                timestamp,
            }))
        }
        _ => Err(ApiError::MissingAuth),
    }
}

/// Signature + freshness policy, shared by every signed route
pub struct Authenticator {
    max_skew: Duration,
    replay: Option<ReplayCache>,
}

impl Authenticator {
    /// `max_skew_secs` is capped at [`MAX_SKEW_CAP_SECS`].
    pub fn new(max_skew_secs: u64, replay_cache_enabled: bool) -> Self {
        let max_skew = Duration::seconds(max_skew_secs.min(MAX_SKEW_CAP_SECS) as i64);
        Self {
            max_skew,
            replay: replay_cache_enabled.then(|| ReplayCache::new(max_skew)),
        }
    }

    pub fn max_skew(&self) -> Duration {
        self.max_skew
    }

    /// Verify signature and freshness without consulting the store.
    /// Registration uses this directly since the key has no record yet.
    pub fn verify_signed(
        &self,
        headers: &AuthHeaders,
        req: &RequestParts<'_>,
        now: DateTime<Utc>,
    ) -> ApiResult<VerifiedRequest> {
        let canonical = canonical_string(req.method, req.path, &headers.timestamp, req.body);

        if !verify(&headers.public_key, &canonical, &headers.signature) {
            return Err(ApiError::InvalidSignature);
        }
        // Everything downstream sees one spelling per key.
        let public_key =
            normalize_public_key(&headers.public_key).map_err(|_| ApiError::InvalidSignature)?;

        let timestamp = parse_timestamp(&headers.timestamp)?;
        check_skew(timestamp, now, self.max_skew)?;

        if let Some(ref cache) = self.replay {
            if !cache.check_and_mark(&public_key, &headers.signature, now) {
                tracing::warn!("Replayed request rejected for {} {}", req.method, req.path);
                return Err(ApiError::ReplayDetected);
            }
        }

        Ok(VerifiedRequest {
            public_key,
            canonical,
            timestamp,
        })
    }

    /// Full pipeline for routes that require a caller
    pub fn authenticate<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        req: &RequestParts<'_>,
        now: DateTime<Utc>,
    ) -> ApiResult<AuthContext> {
        let headers = extract_auth_headers(req.headers)?.ok_or(ApiError::MissingAuth)?;
        self.authenticate_with(store, &headers, req, now)
    }

    /// Anonymous when no auth header is present; full verification otherwise.
    pub fn authenticate_optional<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        req: &RequestParts<'_>,
        now: DateTime<Utc>,
    ) -> ApiResult<Option<AuthContext>> {
        match extract_auth_headers(req.headers)? {
            None => Ok(None),
            Some(headers) => self.authenticate_with(store, &headers, req, now).map(Some),
        }
    }

    fn authenticate_with<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        headers: &AuthHeaders,
        req: &RequestParts<'_>,
        now: DateTime<Utc>,
    ) -> ApiResult<AuthContext> {
        let verified = self.verify_signed(headers, req, now)?;
        let identity = resolve(store, &verified.public_key)?;

        Ok(AuthContext {
            public_key: verified.public_key,
            identity: IdentityPublic::from(&identity),
            canonical: verified.canonical,
        })
    }
}

// ============ Validation Functions ============

/// Validate a mention name
pub fn validate_mention_name(name: &str) -> Result<(), &'static str> {
    if name.len() < 3 {
        return Err("Mention name must be at least 3 characters");
    }
    if name.len() > 32 {
        return Err("Mention name must be at most 32 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err("Mention name must contain only alphanumeric characters, underscores, and hyphens");
    }
    if name.starts_with('_') || name.starts_with('-') {
        return Err("Mention name cannot start with underscore or hyphen");
    }
    if name.ends_with('_') || name.ends_with('-') {
        return Err("Mention name cannot end with underscore or hyphen");
    }
    Ok(())
}

/// Validate display name
pub fn validate_display_name(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Display name cannot be blank");
    }
    if name.chars().count() > 64 {
        return Err("Display name must be at most 64 characters");
    }
    if name.chars().any(|c| c.is_control()) {
        return Err("Display name cannot contain control characters");
    }
    Ok(())
}
