use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::types::{ErrorBody, ErrorDetail, IdentityStatus};

/// Every failure the core can report. Wire codes come from [`ApiError::code`] only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Missing authentication headers")]
    MissingAuth,

    #[error("Timestamp skew too large")]
    TimestampSkew,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Request already seen")]
    ReplayDetected,

    #[error("Unknown identity")]
    UnknownIdentity,

    #[error("Identity is {0}")]
    InactiveIdentity(IdentityStatus),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Identity is not active")]
    IdentityNotActive,

    #[error("Rotation signature does not verify against the old key")]
    InvalidRotationSignature,

    #[error("New key is already registered")]
    NewKeyAlreadyRegistered,

    #[error("Public key already registered")]
    PublicKeyTaken,

    #[error("Mention name already taken")]
    MentionNameTaken,

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Rate limited: {remedy}")]
    RateLimited { remedy: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedInput(_) => "malformed_input",
            ApiError::MissingAuth => "missing_auth",
            ApiError::TimestampSkew => "timestamp_skew",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::ReplayDetected => "replay_detected",
            ApiError::UnknownIdentity => "unknown_identity",
            ApiError::InactiveIdentity(_) => "inactive_identity",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::IdentityNotActive => "identity_not_active",
            ApiError::InvalidRotationSignature => "invalid_rotation_signature",
            ApiError::NewKeyAlreadyRegistered => "new_key_already_registered",
            ApiError::PublicKeyTaken => "public_key_taken",
            ApiError::MentionNameTaken => "mention_name_taken",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingAuth
            | ApiError::TimestampSkew
            | ApiError::InvalidSignature
            | ApiError::ReplayDetected
            | ApiError::UnknownIdentity
            | ApiError::InactiveIdentity(_)
            | ApiError::InvalidRotationSignature => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::IdentityNotActive
            | ApiError::NewKeyAlreadyRegistered
            | ApiError::PublicKeyTaken
            | ApiError::MentionNameTaken
            | ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Authentication failures share one message so the response body does
    /// not reveal which check rejected the request.
    fn public_message(&self) -> String {
        if self.status() == StatusCode::UNAUTHORIZED {
            return "Authentication failed".to_string();
        }
        match self {
            ApiError::RateLimited { remedy } => remedy.clone(),
            ApiError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref msg) = self {
            tracing::error!("Internal error: {}", msg);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
