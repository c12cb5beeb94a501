use serde::{Deserialize, Serialize};

use crate::Role;

/// Decoded JWT body for an authenticated user session.
///
/// Immutable per request — handlers read it via the request-scoped
/// context, they never mutate or re-sign it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: String,
    pub role: Role,
    /// Issued-at, Unix seconds.
    pub iat: u64,
    /// Expiry, Unix seconds.
    pub exp: u64,
}
