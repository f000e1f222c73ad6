//! Public key -> live identity
//!
//! Only `active` records authenticate. A key that was rotated away from,
//! suspended or archived resolves to `InactiveIdentity` forever after (or
//! until reinstated, for suspension).

use crate::error::{ApiError, ApiResult};
use crate::store::IdentityStore;
use crate::types::{Identity, IdentityStatus};

/// Resolve a key to an identity that may authenticate
pub fn resolve<S: IdentityStore + ?Sized>(store: &S, public_key: &str) -> ApiResult<Identity> {
    let identity = store.get(public_key).ok_or(ApiError::UnknownIdentity)?;

    if identity.status != IdentityStatus::Active {
        return Err(ApiError::InactiveIdentity(identity.status));
    }

    Ok(identity)
}

/// Profile lookup by handle. Status is not filtered: archived and
/// suspended profiles stay readable.
pub fn lookup_by_name<S: IdentityStore + ?Sized>(
    store: &S,
    mention_name: &str,
) -> ApiResult<Identity> {
    store
        .get_by_name(mention_name)
        .ok_or_else(|| ApiError::NotFound("Identity not found".into()))
}
