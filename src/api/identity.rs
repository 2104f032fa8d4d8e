use axum::extract::FromRequestParts;
use http::HeaderName;
use http::request::Parts;

use crate::api::server::RouteError;
use crate::db::models::UserId;
use crate::engine::EngineError;

/// Header the gateway uses to forward the authenticated user's id
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// The authenticated caller, as asserted by the gateway
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(&USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(EngineError::Unauthenticated)?;

        Ok(Self(UserId::from(id)))
    }
}
