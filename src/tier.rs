//! Tier-gated write policy
//!
//! Tier 0 identities get a small number of rate-limited writes per UTC
//! calendar day; every higher tier is unlimited. Promotion itself happens
//! elsewhere; this module only acts on the tier a record carries.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{ApiError, ApiResult};
use crate::store::IdentityStore;
use crate::types::{Identity, Tier};

/// Kinds of write the collaborating services ask about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Post,
    Comment,
    Vote,
    CommunityCreate,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Post => "post",
            WriteKind::Comment => "comment",
            WriteKind::Vote => "vote",
            WriteKind::CommunityCreate => "community_create",
        }
    }

    /// Kinds counted against the tier-0 daily allowance
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, WriteKind::Post | WriteKind::CommunityCreate)
    }
}

impl FromStr for WriteKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(WriteKind::Post),
            "comment" => Ok(WriteKind::Comment),
            "vote" => Ok(WriteKind::Vote),
            "community_create" => Ok(WriteKind::CommunityCreate),
            other => Err(ApiError::malformed(format!("Unknown write kind: {}", other))),
        }
    }
}

/// What the identity has already done in the current window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecentActivity {
    /// Rate-limited writes already made on the current UTC day
    pub limited_writes_today: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    Allowed,
    RateLimited { remedy: String },
}

/// UTC calendar day of an instant. Midnight UTC starts a new day.
pub fn calendar_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

pub struct TierEngine {
    tier0_daily_limit: u32,
}

impl TierEngine {
    pub fn new(tier0_daily_limit: u32) -> Self {
        Self { tier0_daily_limit }
    }

    pub fn tier0_daily_limit(&self) -> u32 {
        self.tier0_daily_limit
    }

    /// Pure policy check
    pub fn check_write_allowed(
        &self,
        identity: &Identity,
        kind: WriteKind,
        recent: RecentActivity,
    ) -> WriteDecision {
        if !kind.is_rate_limited() {
            return WriteDecision::Allowed;
        }

        match identity.verification_tier {
            Tier::Unverified if recent.limited_writes_today >= self.tier0_daily_limit => {
                WriteDecision::RateLimited {
                    remedy: format!(
                        "Unverified identities may make {} {} per UTC day; ask a parent identity to vouch for you to lift this limit",
                        self.tier0_daily_limit,
                        if self.tier0_daily_limit == 1 { "post" } else { "posts" }
                    ),
                }
            }
            _ => WriteDecision::Allowed,
        }
    }

    /// Check and record a write in one store transaction. Returns today's
    /// count for rate-limited kinds, `None` for kinds that are not counted.
    pub fn admit_write<S: IdentityStore + ?Sized>(
        &self,
        store: &S,
        public_key: &str,
        kind: WriteKind,
        now: DateTime<Utc>,
    ) -> ApiResult<Option<u32>> {
        if !kind.is_rate_limited() {
            return Ok(None);
        }

        let admit = |identity: &Identity, today: u32| -> ApiResult<()> {
            let recent = RecentActivity {
                limited_writes_today: today,
            };
            match self.check_write_allowed(identity, kind, recent) {
                WriteDecision::Allowed => Ok(()),
                WriteDecision::RateLimited { remedy } => {
                    tracing::info!(
                        "Rate limited {} by {} ({} today)",
                        kind.as_str(),
                        identity.mention_name,
                        today
                    );
                    Err(ApiError::RateLimited { remedy })
                }
            }
        };

        let count = store.admit_limited_write(public_key, calendar_day(now), &admit)?;
        Ok(Some(count))
    }
}

impl Default for TierEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;
    use crate::store::MemoryStore;
    use crate::types::NewIdentity;
    use chrono::{Duration, TimeZone};

    fn identity(tier: Tier) -> Identity {
        let now = Utc::now();
        Identity {
            public_key: "k1".into(),
            mention_name: "alice".into(),
            display_name: None,
            status: crate::types::IdentityStatus::Active,
            verification_tier: tier,
            rotated_from: None,
            rotated_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn recent(n: u32) -> RecentActivity {
        RecentActivity {
            limited_writes_today: n,
        }
    }

    #[test]
    fn test_tier0_threshold() {
        let engine = TierEngine::default();
        let id = identity(Tier::Unverified);

        assert_eq!(
            engine.check_write_allowed(&id, WriteKind::Post, recent(0)),
            WriteDecision::Allowed
        );
        assert!(matches!(
            engine.check_write_allowed(&id, WriteKind::Post, recent(1)),
            WriteDecision::RateLimited { .. }
        ));
    }

    #[test]
    fn test_remedy_names_vouching() {
        let engine = TierEngine::default();
        match engine.check_write_allowed(&identity(Tier::Unverified), WriteKind::Post, recent(1)) {
            WriteDecision::RateLimited { remedy } => assert!(remedy.contains("vouch")),
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[test]
    fn test_higher_tiers_unlimited() {
        let engine = TierEngine::default();
        for tier in [Tier::ParentVouched, Tier::Active, Tier::Established] {
            assert_eq!(
                engine.check_write_allowed(&identity(tier), WriteKind::Post, recent(500)),
                WriteDecision::Allowed
            );
        }
    }

    #[test]
    fn test_unlimited_kinds() {
        let engine = TierEngine::default();
        let id = identity(Tier::Unverified);
        for kind in [WriteKind::Comment, WriteKind::Vote] {
            assert_eq!(
                engine.check_write_allowed(&id, kind, recent(10)),
                WriteDecision::Allowed
            );
        }
    }

    #[test]
    fn test_write_kind_parse() {
        assert_eq!("post".parse::<WriteKind>().unwrap(), WriteKind::Post);
        assert_eq!(
            "community_create".parse::<WriteKind>().unwrap(),
            WriteKind::CommunityCreate
        );
        assert!("Post".parse::<WriteKind>().is_err());
    }

    #[test]
    fn test_calendar_day_boundary() {
        let before = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 59).unwrap();
        let after = before + Duration::seconds(1);
        assert_ne!(calendar_day(before), calendar_day(after));
        assert_eq!(
            calendar_day(Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap()),
            calendar_day(before)
        );
    }

    #[test]
    fn test_admit_write_across_midnight() {
        let store = MemoryStore::new();
        let (_, k1) = generate_keypair();
        store
            .register(
                NewIdentity {
                    public_key: k1.clone(),
                    mention_name: "alice".into(),
                    display_name: None,
                },
                Utc::now(),
            )
            .unwrap();
        let engine = TierEngine::default();
        let late = Utc.with_ymd_and_hms(2026, 10, 16, 23, 59, 58).unwrap();

        assert_eq!(engine.admit_write(&store, &k1, WriteKind::Post, late), Ok(Some(1)));
        assert!(matches!(
            engine.admit_write(&store, &k1, WriteKind::Post, late + Duration::seconds(1)),
            Err(ApiError::RateLimited { .. })
        ));
        // Comments are never counted
        assert_eq!(
            engine.admit_write(&store, &k1, WriteKind::Comment, late),
            Ok(None)
        );
        // First second of the next UTC day
        assert_eq!(
            engine.admit_write(&store, &k1, WriteKind::Post, late + Duration::seconds(2)),
            Ok(Some(1))
        );
    }

    #[test]
    fn test_admit_write_promoted_identity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (_, k1) = generate_keypair();
        store
            .register(
                NewIdentity {
                    public_key: k1.clone(),
                    mention_name: "alice".into(),
                    display_name: None,
                },
                now,
            )
            .unwrap();
        store.update_tier(&k1, Tier::ParentVouched, now).unwrap();
        let engine = TierEngine::default();

        for expected in 1..=5 {
            assert_eq!(
                engine.admit_write(&store, &k1, WriteKind::Post, now),
                Ok(Some(expected))
            );
        }
    }
}
