//! Replay protection
//!
//! The baseline policy is a symmetric clock-skew bound. A captured request
//! can still be replayed inside that window; [`ReplayCache`] closes the gap
//! by remembering `(public_key, signature)` pairs for the window's lifetime.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{ApiError, ApiResult};

/// Largest accepted clock skew, one day
pub const MAX_SKEW_CAP_SECS: u64 = 86_400;

/// Parse an ISO-8601 / RFC 3339 timestamp header
pub fn parse_timestamp(text: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ApiError::malformed(format!("Invalid timestamp: {}", e)))
}

/// Reject when `|now - timestamp| > max_skew`. Equality passes.
pub fn check_skew(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    max_skew: Duration,
) -> ApiResult<()> {
    let skew = if now >= timestamp {
        now - timestamp
    } else {
        timestamp - now
    };
    if skew > max_skew {
        tracing::debug!("Timestamp skew {}ms exceeds limit", skew.num_milliseconds());
        return Err(ApiError::TimestampSkew);
    }
    Ok(())
}

/// Recently seen `(public_key, signature)` pairs with expiry
pub struct ReplayCache {
    seen: DashMap<(String, String), DateTime<Utc>>,
    /// How long an entry is remembered
    retention: Duration,
    /// Unix seconds of the last expiry sweep
    last_sweep: AtomicI64,
}

impl ReplayCache {
    /// A request is acceptable while its timestamp is within `max_skew` on
    /// either side of now, so entries are kept for twice that.
    pub fn new(max_skew: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention: max_skew * 2,
            last_sweep: AtomicI64::new(0),
        }
    }

    /// Record the pair; `false` if it was already present and unexpired.
    /// Only the pair's own shard is locked, except for the periodic sweep.
    pub fn check_and_mark(&self, public_key: &str, signature: &str, now: DateTime<Utc>) -> bool {
        self.sweep_if_due(now);

        match self
            .seen
            .entry((public_key.to_string(), signature.to_string()))
        {
            Entry::Occupied(mut slot) => {
                if *slot.get() > now {
                    return false;
                }
                slot.insert(now + self.retention);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now + self.retention);
                true
            }
        }
    }

    /// Drop expired entries, at most once per retention period. Expired
    /// entries that survive until then are treated as absent.
    fn sweep_if_due(&self, now: DateTime<Utc>) {
        let now_secs = now.timestamp();
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now_secs.saturating_sub(last) < self.retention.num_seconds() {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now_secs, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.seen.retain(|_, expiry| *expiry > now);
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_skew_boundaries() {
        let max = Duration::seconds(60);
        let now = now();

        assert!(check_skew(now, now, max).is_ok());
        assert!(check_skew(now - Duration::seconds(60), now, max).is_ok());
        assert!(check_skew(now + Duration::seconds(60), now, max).is_ok());
        assert_eq!(
            check_skew(now - Duration::seconds(61), now, max),
            Err(ApiError::TimestampSkew)
        );
        assert_eq!(
            check_skew(now + Duration::seconds(61), now, max),
            Err(ApiError::TimestampSkew)
        );
    }

    #[test]
    fn test_skew_sub_second() {
        let max = Duration::seconds(60);
        let now = now();
        assert!(check_skew(now - Duration::milliseconds(60_001), now, max).is_err());
        assert!(check_skew(now + Duration::milliseconds(59_999), now, max).is_ok());
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2026-10-16T12:00:00Z").unwrap();
        assert_eq!(ts, now());

        let offset = parse_timestamp("2026-10-16T14:00:00+02:00").unwrap();
        assert_eq!(offset, now());

        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ApiError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_replay_cache() {
        let cache = ReplayCache::new(Duration::seconds(60));
        let now = now();

        assert!(cache.check_and_mark("key", "sig1", now));
        assert!(!cache.check_and_mark("key", "sig1", now + Duration::seconds(5)));
        assert!(cache.check_and_mark("key", "sig2", now));
        assert!(cache.check_and_mark("other", "sig1", now));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_replay_cache_expiry() {
        let cache = ReplayCache::new(Duration::seconds(60));
        let now = now();

        assert!(cache.check_and_mark("key", "sig", now));
        assert!(!cache.check_and_mark("key", "sig", now + Duration::seconds(119)));
        assert!(cache.check_and_mark("key", "sig", now + Duration::seconds(121)));
    }

    #[test]
    fn test_replay_cache_sweeps_periodically() {
        let cache = ReplayCache::new(Duration::seconds(60));
        let now = now();

        // First call sweeps, so the next one is not due for 120s
        assert!(cache.check_and_mark("key", "a", now));
        assert!(cache.check_and_mark("key", "b", now + Duration::seconds(10)));

        assert!(cache.check_and_mark("key", "c", now + Duration::seconds(119)));
        assert_eq!(cache.len(), 3);

        // The sweep at +135s drops "a" (expired +120) and "b" (+130)
        assert!(cache.check_and_mark("key", "d", now + Duration::seconds(135)));
        assert_eq!(cache.len(), 2);
        assert!(!cache.check_and_mark("key", "c", now + Duration::seconds(136)));
    }

    #[test]
    fn test_expired_entry_accepted_before_sweep() {
        let cache = ReplayCache::new(Duration::seconds(60));
        let now = now();

        assert!(cache.check_and_mark("key", "a", now));
        assert!(cache.check_and_mark("key", "x", now + Duration::seconds(10)));
        // Sweep at +125 keeps "x", which expires at +130
        assert!(cache.check_and_mark("key", "y", now + Duration::seconds(125)));
        assert_eq!(cache.len(), 2);

        // Next sweep is not due until +245; "x" is expired and still present
        assert!(cache.check_and_mark("key", "x", now + Duration::seconds(131)));
        assert!(!cache.check_and_mark("key", "x", now + Duration::seconds(132)));
    }
}
