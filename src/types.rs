//! Core types for the agent identity core
//!
//! Identity is a public key. Everything else (handle, tier, status) hangs
//! off the key record, and key changes are expressed as lineage links
//! between records rather than mutation of the key itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public key in its textual form: `"{payload}:{algorithm}"`
pub type PublicKeyText = String;

// ============ Identity Types ============

/// Identity status in lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    /// Key is live and may authenticate
    Active,
    /// Key was replaced by a successor (terminal)
    Rotated,
    /// Temporarily blocked by an administrator
    Suspended,
    /// Soft-deleted (terminal)
    Archived,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Rotated => "rotated",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::Archived => "archived",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IdentityStatus::Rotated | IdentityStatus::Archived)
    }

    /// Administrative transitions. `active -> rotated` is deliberately absent:
    /// only a rotation can produce it.
    pub fn can_transition_to(&self, next: IdentityStatus) -> bool {
        use IdentityStatus::*;
        matches!(
            (self, next),
            (Active, Suspended) | (Suspended, Active) | (Active, Archived) | (Suspended, Archived)
        )
    }
}

impl std::fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verification tier. Stored as an integer 0-3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Fresh registration, posting is rate limited
    Unverified = 0,
    /// Vouched for by a parent identity
    ParentVouched = 1,
    /// At least 7 days old with 5 posts
    Active = 2,
    /// At least 30 days, 10 active days and social proof
    Established = 3,
}

impl Tier {
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Tier::Unverified),
            1 => Ok(Tier::ParentVouched),
            2 => Ok(Tier::Active),
            3 => Ok(Tier::Established),
            other => Err(format!("Tier must be between 0 and 3, got {}", other)),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

/// Core identity record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Public key, the identity token
    pub public_key: PublicKeyText,
    /// Unique handle
    pub mention_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub status: IdentityStatus,
    pub verification_tier: Tier,
    /// Predecessor in the lineage chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<PublicKeyText>,
    /// Successor in the lineage chain; set only when status is `rotated`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_to: Option<PublicKeyText>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit entry written once per rotation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationRecord {
    pub id: Uuid,
    pub old_key: PublicKeyText,
    pub new_key: PublicKeyText,
    /// Old key's signature over the rotation statement (base64)
    pub rotation_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Fields needed to create a fresh identity record
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub public_key: PublicKeyText,
    pub mention_name: String,
    pub display_name: Option<String>,
}

/// Per-request authentication result. Lives only for the request scope.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub public_key: PublicKeyText,
    pub identity: IdentityPublic,
    /// The exact string that was verified
    pub canonical: String,
}

// ============ API Request/Response Types ============

/// Registration request. The request itself must be signed by `X-Public-Key`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub mention_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Key rotation request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotateKeyRequest {
    pub old_key: PublicKeyText,
    pub new_key: PublicKeyText,
    pub rotation_signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Rotation response
#[derive(Debug, Serialize)]
pub struct RotationOutcome {
    pub old: IdentityPublic,
    pub new: IdentityPublic,
    pub record: RotationRecord,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTierRequest {
    pub public_key: PublicKeyText,
    pub tier: Tier,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub public_key: PublicKeyText,
    pub status: IdentityStatus,
}

/// Write admission response
#[derive(Debug, Serialize)]
pub struct WriteAdmission {
    pub kind: String,
    pub tier: Tier,
    /// Rate-limited actions recorded today, including this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_today: Option<u32>,
}

/// Lineage view for a key
#[derive(Debug, Serialize)]
pub struct LineageResponse {
    pub root: PublicKeyText,
    pub head: PublicKeyText,
    pub chain: Vec<IdentityPublic>,
    pub rotations: Vec<RotationRecord>,
}

// ============ Response Types ============

/// Standard success wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Error body: `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Identity public view (safe for API responses)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityPublic {
    pub public_key: PublicKeyText,
    pub mention_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub status: IdentityStatus,
    pub verification_tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<PublicKeyText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_to: Option<PublicKeyText>,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for IdentityPublic {
    fn from(i: &Identity) -> Self {
        Self {
            public_key: i.public_key.clone(),
            mention_name: i.mention_name.clone(),
            display_name: i.display_name.clone(),
            status: i.status,
            verification_tier: i.verification_tier,
            rotated_from: i.rotated_from.clone(),
            rotated_to: i.rotated_to.clone(),
            created_at: i.created_at,
        }
    }
}

/// Profile lookup, with the caller's context when the read was signed
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub identity: IdentityPublic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<PublicKeyText>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub identities_count: usize,
}

/// Public stats response
#[derive(Debug, Serialize, Default, PartialEq, Eq)]
pub struct StatsResponse {
    pub total_identities: usize,
    pub active_identities: usize,
    pub rotated_identities: usize,
    pub suspended_identities: usize,
    pub archived_identities: usize,
    pub total_rotations: usize,
}
