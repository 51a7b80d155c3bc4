//! Extract the caller's session from request headers set by the upstream session layer.

use crate::access::Role;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts, http::HeaderMap};

pub const ROLE_HEADER: &str = "X-Role";
pub const USER_TYPE_HEADER: &str = "X-User-Type";
pub const SUB_TYPE_HEADER: &str = "X-Sub-Type";
pub const USER_ID_HEADER: &str = "X-User-Id";
pub const SITE_ID_HEADER: &str = "X-Site-Id";

/// Opaque identity inputs for access control and tenant scoping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub role: Role,
    /// Coarse user type, compared against an entity's minimum access level.
    pub user_type: i64,
    pub sub_type: i64,
    pub user_id: String,
    /// Tenant (site) the caller belongs to; empty when unscoped.
    pub site_id: String,
}

impl Session {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let int = |name: &str| text(name).parse::<i64>().unwrap_or(0);
        Session {
            role: Role::from_level(int(ROLE_HEADER)),
            user_type: int(USER_TYPE_HEADER),
            sub_type: int(SUB_TYPE_HEADER),
            user_id: text(USER_ID_HEADER),
            site_id: text(SITE_ID_HEADER),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Session::from_headers(&parts.headers))
    }
}
