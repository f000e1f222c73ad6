//! Application state for the identity service

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::interval;

use crate::auth::{
    extract_auth_headers, validate_display_name, validate_mention_name, Authenticator,
    RequestParts,
};
use crate::config::Config;
use crate::crypto::normalize_public_key;
use crate::error::{ApiError, ApiResult};
use crate::resolver::lookup_by_name;
use crate::rotation::{lineage, records_for_chain, verify_lineage, KeyRotationManager};
use crate::store::{IdentityStore, MemoryStore, StoreSnapshot};
use crate::tier::{TierEngine, WriteKind};
use crate::types::*;

/// Shared service state. The store is the only mutable resource requests
/// touch; everything else is configuration.
pub struct AppState {
    pub store: MemoryStore,
    pub authenticator: Authenticator,
    pub tiers: TierEngine,
    pub rotations: KeyRotationManager,
    /// Configuration
    pub config: Config,
    /// Start time for uptime calculation
    pub start_time: Instant,
    /// Persistence dirty flag
    dirty: AtomicBool,
    /// Notify for immediate save
    persist_notify: Notify,
    /// Shutdown flag
    shutdown: AtomicBool,
    /// Last persist time
    pub last_persist: std::sync::RwLock<Option<DateTime<Utc>>>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            store: MemoryStore::new(),
            authenticator: Authenticator::new(config.max_clock_skew, config.replay_cache_enabled),
            tiers: TierEngine::new(config.tier0_daily_limit),
            rotations: KeyRotationManager::new(config.rotation_tier_policy),
            config,
            start_time: Instant::now(),
            dirty: AtomicBool::new(false),
            persist_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            last_persist: std::sync::RwLock::new(None),
        })
    }

    /// Load state from disk
    pub async fn load_from_disk(self: &Arc<Self>) -> anyhow::Result<()> {
        let path = self.config.state_file_path();

        if path.exists() {
            let json = tokio::fs::read_to_string(&path).await?;
            let snapshot: StateSnapshot = serde_json::from_str(&json)?;
            self.store.restore(snapshot.store);

            tracing::info!(
                "Loaded state: {} identities, {} rotations",
                self.store.len(),
                self.store.rotation_records().len()
            );
        } else {
            tracing::info!("No existing state file, starting fresh");
        }

        Ok(())
    }

    /// Start background persistence worker
    pub fn spawn_persister(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        let persist_interval = state.config.persist_interval;

        tokio::spawn(async move {
            let mut ticker = interval(persist_interval);

            loop {
                if state.shutdown.load(Ordering::SeqCst) {
                    tracing::info!("Persister shutting down, final save...");
                    if let Err(e) = state.save_to_disk().await {
                        tracing::error!("Failed final persist: {}", e);
                    }
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        if state.dirty.swap(false, Ordering::SeqCst) {
                            if let Err(e) = state.save_to_disk().await {
                                tracing::error!("Failed to persist state: {}", e);
                            }
                        }
                    }
                    _ = state.persist_notify.notified() => {
                        state.dirty.store(false, Ordering::SeqCst);
                        if let Err(e) = state.save_to_disk().await {
                            tracing::error!("Failed to persist state: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Signal shutdown
    pub fn signal_shutdown(&self) {
        tracing::info!("Shutdown signaled");
        self.shutdown.store(true, Ordering::SeqCst);
        self.persist_notify.notify_one();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Save state to disk via temp file + rename
    pub async fn save_to_disk(&self) -> anyhow::Result<()> {
        let snapshot = StateSnapshot {
            store: self.store.snapshot(),
            saved_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let path = self.config.state_file_path();
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        *self
            .last_persist
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        tracing::info!(
            "State persisted: {} identities",
            snapshot.store.identities.len()
        );
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    // ============ Authentication ============

    pub fn authenticate(&self, req: &RequestParts<'_>) -> ApiResult<AuthContext> {
        self.authenticator.authenticate(&self.store, req, Utc::now())
    }

    pub fn authenticate_optional(&self, req: &RequestParts<'_>) -> ApiResult<Option<AuthContext>> {
        self.authenticator
            .authenticate_optional(&self.store, req, Utc::now())
    }

    // ============ Identity Operations ============

    /// Register the key that signed this request as a new identity
    pub fn register(&self, req: &RequestParts<'_>, now: DateTime<Utc>) -> ApiResult<IdentityPublic> {
        let headers = extract_auth_headers(req.headers)?.ok_or(ApiError::MissingAuth)?;
        let verified = self.authenticator.verify_signed(&headers, req, now)?;

        let body: RegisterRequest = serde_json::from_slice(req.body)
            .map_err(|e| ApiError::malformed(format!("Invalid registration body: {}", e)))?;

        validate_mention_name(&body.mention_name).map_err(ApiError::malformed)?;
        if let Some(ref display_name) = body.display_name {
            validate_display_name(display_name).map_err(ApiError::malformed)?;
        }

        let identity = self.store.register(
            NewIdentity {
                public_key: verified.public_key,
                mention_name: body.mention_name,
                display_name: body.display_name,
            },
            now,
        )?;

        self.mark_dirty();
        tracing::info!("Registered identity: {}", identity.mention_name);

        Ok(IdentityPublic::from(&identity))
    }

    /// Public profile by mention name
    pub fn profile(&self, mention_name: &str, viewer: Option<AuthContext>) -> ApiResult<ProfileResponse> {
        let identity = lookup_by_name(&self.store, mention_name)?;
        Ok(ProfileResponse {
            identity: IdentityPublic::from(&identity),
            viewer: viewer.map(|ctx| ctx.public_key),
        })
    }

    /// Tier and rate-limit admission for one write
    pub fn admit_write(
        &self,
        ctx: &AuthContext,
        kind: WriteKind,
        now: DateTime<Utc>,
    ) -> ApiResult<WriteAdmission> {
        let count_today = self
            .tiers
            .admit_write(&self.store, &ctx.public_key, kind, now)?;
        if count_today.is_some() {
            self.mark_dirty();
        }

        Ok(WriteAdmission {
            kind: kind.as_str().to_string(),
            tier: ctx.identity.verification_tier,
            count_today,
        })
    }

    pub fn rotate(&self, req: RotateKeyRequest, now: DateTime<Utc>) -> ApiResult<RotationOutcome> {
        let committed = self.rotations.rotate(&self.store, req, now)?;

        // Rotations are rare and must survive a crash.
        self.persist_notify.notify_one();

        Ok(RotationOutcome {
            old: IdentityPublic::from(&committed.old),
            new: IdentityPublic::from(&committed.new),
            record: committed.record,
        })
    }

    /// Lineage by pointers, cross-checked against the rotation audit trail
    pub fn lineage(&self, public_key: &str) -> ApiResult<LineageResponse> {
        let public_key = normalize_public_key(public_key)
            .map_err(|_| ApiError::NotFound("Identity not found".into()))?;
        let public_key = public_key.as_str();

        let chain = lineage(&self.store, public_key)?;
        let keys: Vec<PublicKeyText> = chain.iter().map(|i| i.public_key.clone()).collect();

        let records = self.store.rotation_records();
        let audited = verify_lineage(&records, public_key)?;
        if audited != keys {
            tracing::error!("Lineage pointers disagree with rotation audit trail");
            return Err(ApiError::internal(
                "Lineage pointers disagree with rotation audit trail",
            ));
        }

        let root = keys.first().cloned().unwrap_or_default();
        let head = keys.last().cloned().unwrap_or_default();
        Ok(LineageResponse {
            root,
            head,
            chain: chain.iter().map(IdentityPublic::from).collect(),
            rotations: records_for_chain(&records, &keys),
        })
    }

    // ============ Administration ============

    fn require_admin(&self, ctx: &AuthContext) -> ApiResult<()> {
        if self.config.is_admin(&ctx.public_key) {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Administrator key required".into()))
        }
    }

    pub fn update_tier(
        &self,
        ctx: &AuthContext,
        req: UpdateTierRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<IdentityPublic> {
        self.require_admin(ctx)?;
        let identity = self.store.update_tier(&req.public_key, req.tier, now)?;

        self.mark_dirty();
        tracing::info!(
            "Tier of {} set to {} by {}",
            identity.mention_name,
            identity.verification_tier.level(),
            ctx.identity.mention_name
        );
        Ok(IdentityPublic::from(&identity))
    }

    pub fn set_status(
        &self,
        ctx: &AuthContext,
        req: UpdateStatusRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<IdentityPublic> {
        self.require_admin(ctx)?;
        let identity = self.store.set_status(&req.public_key, req.status, now)?;

        self.persist_notify.notify_one();
        tracing::info!(
            "Status of {} set to {} by {}",
            identity.mention_name,
            identity.status,
            ctx.identity.mention_name
        );
        Ok(IdentityPublic::from(&identity))
    }

    // ============ Service Info ============

    /// Get health info
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".into(),
            version: self.config.version.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            identities_count: self.store.len(),
        }
    }

    /// Get public stats
    pub fn stats(&self) -> StatsResponse {
        self.store.stats()
    }
}

#[derive(Serialize, Deserialize)]
struct StateSnapshot {
    store: StoreSnapshot,
    saved_at: DateTime<Utc>,
}
