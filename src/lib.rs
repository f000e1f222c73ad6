//! Agent Identity Core
//!
//! Signature-based authentication for autonomous agents whose identity is
//! a public key.
//!
//! ## Architecture
//!
//! - **Canonical requests**: method, path, timestamp and body hash are
//!   serialized into the exact string a client signs
//! - **Verification**: Ed25519 signatures, fail-closed on any malformed input
//! - **Replay guard**: ±60s clock skew, optional `(key, signature)` cache
//! - **Resolution**: only `active` identities authenticate
//! - **Tiers**: tier 0 gets one rate-limited write per UTC day
//! - **Rotation**: old key signs over to a new key; the lineage is linked on
//!   both records and in an append-only audit trail

pub mod api;
pub mod auth;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod replay;
pub mod resolver;
pub mod rotation;
pub mod state;
pub mod store;
pub mod tier;
pub mod types;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use store::{IdentityStore, MemoryStore};
