//! Identity store
//!
//! The only shared mutable state in the core. Reads run concurrently under
//! a read lock; every write takes the write lock, re-checks its
//! preconditions, and only then mutates, so a rejected write leaves the
//! store exactly as it was.
//!
//! Keys are stored under their normalized text (see
//! [`normalize_public_key`]), so every spelling of one key maps to one
//! record.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::normalize_public_key;
use crate::error::{ApiError, ApiResult};
use crate::types::{
    Identity, IdentityStatus, NewIdentity, PublicKeyText, RotationRecord, StatsResponse, Tier,
};

/// How the successor's tier is chosen on rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTierPolicy {
    /// Successor keeps the predecessor's tier
    #[default]
    Inherit,
    /// Successor starts again at tier 0
    Reset,
}

/// A rotation whose proof has already been checked
#[derive(Debug, Clone)]
pub struct RotationPlan {
    pub old_key: PublicKeyText,
    pub new_key: PublicKeyText,
    pub rotation_signature: String,
    pub reason: Option<String>,
    pub tier_policy: RotationTierPolicy,
}

/// Result of a committed rotation
#[derive(Debug, Clone)]
pub struct CommittedRotation {
    pub old: Identity,
    pub new: Identity,
    pub record: RotationRecord,
}

/// Per-identity counter of rate-limited writes for one UTC day
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub count: u32,
}

/// Admission check run inside the write transaction with the identity and
/// the number of rate-limited writes it already made today.
pub type AdmitFn<'a> = &'a dyn Fn(&Identity, u32) -> ApiResult<()>;

/// Transactional access to identity records
pub trait IdentityStore: Send + Sync {
    /// Latest committed record for a key, whatever its status
    fn get(&self, public_key: &str) -> Option<Identity>;

    /// Current holder of a mention name (case-insensitive)
    fn get_by_name(&self, mention_name: &str) -> Option<Identity>;

    /// Create a tier-0 active identity
    fn register(&self, new: NewIdentity, now: DateTime<Utc>) -> ApiResult<Identity>;

    /// Apply a rotation atomically
    fn rotate(&self, plan: RotationPlan, now: DateTime<Utc>) -> ApiResult<CommittedRotation>;

    /// Raise an identity's tier; lowering is rejected
    fn update_tier(&self, public_key: &str, tier: Tier, now: DateTime<Utc>) -> ApiResult<Identity>;

    /// Administrative status change (suspend, reinstate, archive)
    fn set_status(
        &self,
        public_key: &str,
        status: IdentityStatus,
        now: DateTime<Utc>,
    ) -> ApiResult<Identity>;

    /// Count-and-insert for a rate-limited write as one conditional step.
    /// Returns today's count including the admitted write.
    fn admit_limited_write(&self, public_key: &str, day: NaiveDate, admit: AdmitFn<'_>)
        -> ApiResult<u32>;

    /// Rate-limited writes recorded for `day`
    fn writes_on(&self, public_key: &str, day: NaiveDate) -> u32;

    /// The full rotation audit trail, oldest first
    fn rotation_records(&self) -> Vec<RotationRecord>;

    fn stats(&self) -> StatsResponse;
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Records indexed by public key
    identities: HashMap<PublicKeyText, Identity>,
    /// Lowercased mention name -> current holder's key
    names: HashMap<String, PublicKeyText>,
    /// Append-only rotation audit trail
    rotations: Vec<RotationRecord>,
    /// Rate-limited writes per key for the current UTC day
    daily_writes: HashMap<PublicKeyText, DailyCount>,
}

/// In-memory store behind a single lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

/// Serializable form of the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub identities: Vec<Identity>,
    pub rotations: Vec<RotationRecord>,
    #[serde(default)]
    pub daily_writes: Vec<(PublicKeyText, DailyCount)>,
}

/// Stored form of a key, `None` when the text is not a valid key
fn stored_key(public_key: &str) -> Option<PublicKeyText> {
    normalize_public_key(public_key).ok()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.read();
        StoreSnapshot {
            identities: inner.identities.values().cloned().collect(),
            rotations: inner.rotations.clone(),
            daily_writes: inner
                .daily_writes
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Replace the store's contents, rebuilding the name index. A name
    /// belongs to the record in its lineage that has not been rotated away.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        let mut names = HashMap::new();
        for identity in &snapshot.identities {
            if identity.status != IdentityStatus::Rotated {
                names.insert(
                    identity.mention_name.to_lowercase(),
                    identity.public_key.clone(),
                );
            }
        }

        let mut inner = self.write();
        inner.identities = snapshot
            .identities
            .into_iter()
            .map(|i| (i.public_key.clone(), i))
            .collect();
        inner.names = names;
        inner.rotations = snapshot.rotations;
        inner.daily_writes = snapshot.daily_writes.into_iter().collect();
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, public_key: &str) -> Option<Identity> {
        let key = stored_key(public_key)?;
        self.read().identities.get(&key).cloned()
    }

    fn get_by_name(&self, mention_name: &str) -> Option<Identity> {
        let inner = self.read();
        inner
            .names
            .get(&mention_name.to_lowercase())
            .and_then(|key| inner.identities.get(key))
            .cloned()
    }

    fn register(&self, new: NewIdentity, now: DateTime<Utc>) -> ApiResult<Identity> {
        let public_key = normalize_public_key(&new.public_key)
            .map_err(|e| ApiError::malformed(format!("Invalid public key: {}", e)))?;

        let mut inner = self.write();

        if inner.identities.contains_key(&public_key) {
            return Err(ApiError::PublicKeyTaken);
        }
        let name_key = new.mention_name.to_lowercase();
        if inner.names.contains_key(&name_key) {
            return Err(ApiError::MentionNameTaken);
        }

        let identity = Identity {
            public_key,
            mention_name: new.mention_name,
            display_name: new.display_name,
            status: IdentityStatus::Active,
            verification_tier: Tier::Unverified,
            rotated_from: None,
            rotated_to: None,
            created_at: now,
            updated_at: now,
        };

        inner.names.insert(name_key, identity.public_key.clone());
        inner
            .identities
            .insert(identity.public_key.clone(), identity.clone());

        Ok(identity)
    }

    fn rotate(&self, plan: RotationPlan, now: DateTime<Utc>) -> ApiResult<CommittedRotation> {
        let old_key = stored_key(&plan.old_key).ok_or(ApiError::UnknownIdentity)?;
        let new_key = normalize_public_key(&plan.new_key)
            .map_err(|e| ApiError::malformed(format!("Invalid new key: {}", e)))?;

        let mut inner = self.write();

        let old = inner
            .identities
            .get(&old_key)
            .cloned()
            .ok_or(ApiError::UnknownIdentity)?;
        if old.status != IdentityStatus::Active {
            return Err(ApiError::IdentityNotActive);
        }
        if old_key == new_key || inner.identities.contains_key(&new_key) {
            return Err(ApiError::NewKeyAlreadyRegistered);
        }

        let tier = match plan.tier_policy {
            RotationTierPolicy::Inherit => old.verification_tier,
            RotationTierPolicy::Reset => Tier::Unverified,
        };

        let new = Identity {
            public_key: new_key.clone(),
            mention_name: old.mention_name.clone(),
            display_name: old.display_name.clone(),
            status: IdentityStatus::Active,
            verification_tier: tier,
            rotated_from: Some(old_key.clone()),
            rotated_to: None,
            created_at: now,
            updated_at: now,
        };

        let mut retired = old;
        retired.status = IdentityStatus::Rotated;
        retired.rotated_to = Some(new_key.clone());
        retired.updated_at = now;

        let record = RotationRecord {
            id: Uuid::new_v4(),
            old_key,
            new_key,
            rotation_signature: plan.rotation_signature,
            reason: plan.reason,
            rotated_at: now,
        };

        // Nothing below can fail.
        inner
            .names
            .insert(new.mention_name.to_lowercase(), new.public_key.clone());
        inner
            .identities
            .insert(retired.public_key.clone(), retired.clone());
        inner.identities.insert(new.public_key.clone(), new.clone());
        inner.rotations.push(record.clone());

        Ok(CommittedRotation {
            old: retired,
            new,
            record,
        })
    }

    fn update_tier(&self, public_key: &str, tier: Tier, now: DateTime<Utc>) -> ApiResult<Identity> {
        let key = stored_key(public_key)
            .ok_or_else(|| ApiError::NotFound("Identity not found".into()))?;
        let mut inner = self.write();
        let identity = inner
            .identities
            .get_mut(&key)
            .ok_or_else(|| ApiError::NotFound("Identity not found".into()))?;

        if identity.status.is_terminal() {
            return Err(ApiError::InvalidTransition(format!(
                "Identity is {}",
                identity.status
            )));
        }
        if tier < identity.verification_tier {
            return Err(ApiError::InvalidTransition(format!(
                "Tier cannot decrease from {} to {}",
                identity.verification_tier.level(),
                tier.level()
            )));
        }

        identity.verification_tier = tier;
        identity.updated_at = now;
        Ok(identity.clone())
    }

    fn set_status(
        &self,
        public_key: &str,
        status: IdentityStatus,
        now: DateTime<Utc>,
    ) -> ApiResult<Identity> {
        let key = stored_key(public_key)
            .ok_or_else(|| ApiError::NotFound("Identity not found".into()))?;
        let mut inner = self.write();
        let identity = inner
            .identities
            .get_mut(&key)
            .ok_or_else(|| ApiError::NotFound("Identity not found".into()))?;

        if !identity.status.can_transition_to(status) {
            return Err(ApiError::InvalidTransition(format!(
                "Cannot change status from {} to {}",
                identity.status, status
            )));
        }

        identity.status = status;
        identity.updated_at = now;
        Ok(identity.clone())
    }

    fn admit_limited_write(
        &self,
        public_key: &str,
        day: NaiveDate,
        admit: AdmitFn<'_>,
    ) -> ApiResult<u32> {
        let key = stored_key(public_key).ok_or(ApiError::UnknownIdentity)?;
        let mut inner = self.write();

        let identity = inner
            .identities
            .get(&key)
            .ok_or(ApiError::UnknownIdentity)?;
        if identity.status != IdentityStatus::Active {
            return Err(ApiError::InactiveIdentity(identity.status));
        }

        let today = match inner.daily_writes.get(&key) {
            Some(c) if c.day == day => c.count,
            _ => 0,
        };

        admit(identity, today)?;

        let count = today + 1;
        inner.daily_writes.insert(key, DailyCount { day, count });
        Ok(count)
    }

    fn writes_on(&self, public_key: &str, day: NaiveDate) -> u32 {
        let Some(key) = stored_key(public_key) else {
            return 0;
        };
        match self.read().daily_writes.get(&key) {
            Some(c) if c.day == day => c.count,
            _ => 0,
        }
    }

    fn rotation_records(&self) -> Vec<RotationRecord> {
        self.read().rotations.clone()
    }

    fn stats(&self) -> StatsResponse {
        let inner = self.read();
        let mut stats = StatsResponse {
            total_identities: inner.identities.len(),
            total_rotations: inner.rotations.len(),
            ..StatsResponse::default()
        };
        for identity in inner.identities.values() {
            match identity.status {
                IdentityStatus::Active => stats.active_identities += 1,
                IdentityStatus::Rotated => stats.rotated_identities += 1,
                IdentityStatus::Suspended => stats.suspended_identities += 1,
                IdentityStatus::Archived => stats.archived_identities += 1,
            }
        }
        stats
    }
}
