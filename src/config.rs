use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::normalize_public_key;
use crate::replay::MAX_SKEW_CAP_SECS;
use crate::store::RotationTierPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub version: String,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub persist_interval: Duration,
    /// Accepted clock skew for signed requests, in seconds
    pub max_clock_skew: u64,
    /// Remember `(public_key, signature)` pairs to reject exact replays
    pub replay_cache_enabled: bool,
    /// Rate-limited writes per UTC day for tier 0
    pub tier0_daily_limit: u32,
    pub rotation_tier_policy: RotationTierPolicy,
    /// Public keys allowed to change tiers and statuses
    pub admin_keys: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            persist_interval: Duration::from_secs(
                env::var("PERSIST_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_clock_skew: clock_skew_from(env::var("MAX_CLOCK_SKEW_SECS").ok().as_deref()),
            replay_cache_enabled: env::var("REPLAY_CACHE_ENABLED")
                .ok()
                .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            tier0_daily_limit: env::var("TIER0_DAILY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            rotation_tier_policy: match env::var("ROTATION_TIER_POLICY").as_deref() {
                Ok("reset") => RotationTierPolicy::Reset,
                _ => RotationTierPolicy::Inherit,
            },
            admin_keys: env::var("ADMIN_KEYS")
                .map(|s| parse_key_list(&s))
                .unwrap_or_default(),
        }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Admin keys match in any spelling of the same key
    pub fn is_admin(&self, public_key: &str) -> bool {
        let Ok(key) = normalize_public_key(public_key) else {
            return false;
        };
        self.admin_keys
            .iter()
            .any(|k| normalize_public_key(k).is_ok_and(|admin| admin == key))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn clock_skew_from(raw: Option<&str>) -> u64 {
    let secs = raw.and_then(|s| s.trim().parse().ok()).unwrap_or(60);
    if secs > MAX_SKEW_CAP_SECS {
        tracing::warn!(
            "MAX_CLOCK_SKEW_SECS={} exceeds {}, capping",
            secs,
            MAX_SKEW_CAP_SECS
        );
    }
    secs.min(MAX_SKEW_CAP_SECS)
}

fn parse_key_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
