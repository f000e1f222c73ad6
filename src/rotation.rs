//! Key rotation and lineage
//!
//! A rotation retires one key and creates a successor record. The old key
//! must sign the rotation statement, so only the holder of the asset being
//! retired can hand the identity on. Each rotation also appends a
//! [`RotationRecord`], and the lineage can be rebuilt and re-verified from
//! those records alone.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;

use crate::crypto::{normalize_public_key, sign, verify};
use crate::error::{ApiError, ApiResult};
use crate::store::{CommittedRotation, IdentityStore, RotationPlan, RotationTierPolicy};
use crate::types::{Identity, IdentityStatus, PublicKeyText, RotateKeyRequest, RotationRecord};

/// Longest accepted rotation reason
pub const MAX_REASON_LEN: usize = 280;

/// The statement the old key signs to hand over to the new key. Both keys
/// appear in their normalized form.
pub fn rotation_statement(old_key: &str, new_key: &str) -> String {
    format!("rotate-key\n{}\n{}", old_key, new_key)
}

/// Client-side helper producing a complete rotation request. The keys are
/// sent as given; text that is not a valid key is signed verbatim.
pub fn sign_rotation(
    old_signing_key: &SigningKey,
    old_key: &str,
    new_key: &str,
    reason: Option<String>,
) -> RotateKeyRequest {
    let normalized = |k: &str| normalize_public_key(k).unwrap_or_else(|_| k.to_string());
    let statement = rotation_statement(&normalized(old_key), &normalized(new_key));
    RotateKeyRequest {
        old_key: old_key.to_string(),
        new_key: new_key.to_string(),
        rotation_signature: sign(old_signing_key, &statement),
        reason,
    }
}

pub struct KeyRotationManager {
    tier_policy: RotationTierPolicy,
}

impl KeyRotationManager {
    pub fn new(tier_policy: RotationTierPolicy) -> Self {
        Self { tier_policy }
    }

    pub fn tier_policy(&self) -> RotationTierPolicy {
        self.tier_policy
    }

    /// Execute a rotation. Preconditions are checked in order (old key
    /// active, proof valid, new key well formed and unused); the store
    /// re-checks the first and last inside its write transaction.
    pub fn rotate<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        req: RotateKeyRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<CommittedRotation> {
        if let Some(ref reason) = req.reason {
            if reason.chars().count() > MAX_REASON_LEN {
                return Err(ApiError::malformed(format!(
                    "Reason must be at most {} characters",
                    MAX_REASON_LEN
                )));
            }
        }

        let old_key =
            normalize_public_key(&req.old_key).map_err(|_| ApiError::UnknownIdentity)?;
        let old = store.get(&old_key).ok_or(ApiError::UnknownIdentity)?;
        if old.status != IdentityStatus::Active {
            return Err(ApiError::IdentityNotActive);
        }

        let parsed_new = normalize_public_key(&req.new_key);
        let signed_new = parsed_new.as_deref().unwrap_or(req.new_key.as_str());
        let statement = rotation_statement(&old_key, signed_new);
        if !verify(&old_key, &statement, &req.rotation_signature) {
            return Err(ApiError::InvalidRotationSignature);
        }

        let new_key =
            parsed_new.map_err(|e| ApiError::malformed(format!("Invalid new key: {}", e)))?;

        if new_key == old_key || store.get(&new_key).is_some() {
            return Err(ApiError::NewKeyAlreadyRegistered);
        }

        let committed = store.rotate(
            RotationPlan {
                old_key,
                new_key,
                rotation_signature: req.rotation_signature,
                reason: req.reason,
                tier_policy: self.tier_policy,
            },
            now,
        )?;

        tracing::info!(
            "Rotated identity {} to a new key (tier {})",
            committed.new.mention_name,
            committed.new.verification_tier.level()
        );

        Ok(committed)
    }
}

impl Default for KeyRotationManager {
    fn default() -> Self {
        Self::new(RotationTierPolicy::Inherit)
    }
}

/// The chain containing `public_key`, ordered root -> head, following the
/// identity records' pointers.
pub fn lineage<S: IdentityStore + ?Sized>(store: &S, public_key: &str) -> ApiResult<Vec<Identity>> {
    let start = store
        .get(public_key)
        .ok_or_else(|| ApiError::NotFound("Identity not found".into()))?;

    let mut seen = HashSet::new();
    seen.insert(start.public_key.clone());

    let mut root = start.clone();
    while let Some(prev_key) = root.rotated_from.clone() {
        if !seen.insert(prev_key.clone()) {
            return Err(ApiError::internal("Lineage cycle detected"));
        }
        root = store
            .get(&prev_key)
            .ok_or_else(|| ApiError::internal("Lineage points at a missing record"))?;
    }

    let mut chain = vec![root];
    seen.clear();
    seen.insert(chain[0].public_key.clone());
    while let Some(next_key) = chain.last().and_then(|i| i.rotated_to.clone()) {
        if !seen.insert(next_key.clone()) {
            return Err(ApiError::internal("Lineage cycle detected"));
        }
        let next = store
            .get(&next_key)
            .ok_or_else(|| ApiError::internal("Lineage points at a missing record"))?;
        chain.push(next);
    }

    Ok(chain)
}

/// The newest record in the lineage of any key, historical or current.
/// Used to attribute content signed by a retired key to its current owner.
pub fn current_head<S: IdentityStore + ?Sized>(store: &S, public_key: &str) -> ApiResult<Identity> {
    lineage(store, public_key)?
        .pop()
        .ok_or_else(|| ApiError::NotFound("Identity not found".into()))
}

/// Whether two keys belong to the same lineage
pub fn same_lineage<S: IdentityStore + ?Sized>(store: &S, a: &str, b: &str) -> ApiResult<bool> {
    Ok(lineage(store, a)?.iter().any(|i| i.public_key == b))
}

/// Rebuild the chain through `public_key` from rotation records alone and
/// re-verify every rotation signature. Returns the keys root -> head.
pub fn verify_lineage(records: &[RotationRecord], public_key: &str) -> ApiResult<Vec<PublicKeyText>> {
    let start = normalize_public_key(public_key).unwrap_or_else(|_| public_key.to_string());
    let mut successor: HashMap<&str, &RotationRecord> = HashMap::new();
    let mut predecessor: HashMap<&str, &str> = HashMap::new();

    for record in records {
        if successor.insert(record.old_key.as_str(), record).is_some() {
            return Err(ApiError::internal(format!(
                "Key rotated more than once in audit trail (record {})",
                record.id
            )));
        }
        if predecessor
            .insert(record.new_key.as_str(), record.old_key.as_str())
            .is_some()
        {
            return Err(ApiError::internal(format!(
                "Key has two predecessors in audit trail (record {})",
                record.id
            )));
        }
    }

    let mut root = start.as_str();
    let mut steps = 0;
    while let Some(prev) = predecessor.get(root) {
        root = *prev;
        steps += 1;
        if steps > records.len() {
            return Err(ApiError::internal("Lineage cycle detected in audit trail"));
        }
    }

    let mut chain = vec![root.to_string()];
    let mut current = root;
    while let Some(record) = successor.get(current) {
        let statement = rotation_statement(&record.old_key, &record.new_key);
        if !verify(&record.old_key, &statement, &record.rotation_signature) {
            return Err(ApiError::internal(format!(
                "Rotation record {} has an invalid signature",
                record.id
            )));
        }
        current = record.new_key.as_str();
        chain.push(current.to_string());
        if chain.len() > records.len() + 1 {
            return Err(ApiError::internal("Lineage cycle detected in audit trail"));
        }
    }

    Ok(chain)
}

/// Records belonging to a chain of keys, in chain order
pub fn records_for_chain(records: &[RotationRecord], chain: &[PublicKeyText]) -> Vec<RotationRecord> {
    chain
        .windows(2)
        .filter_map(|pair| {
            records
                .iter()
                .find(|r| r.old_key == pair[0] && r.new_key == pair[1])
                .cloned()
        })
        .collect()
}
