use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::api::server::{AppState, RouteError};
use crate::util::constant_time_cmp;

/// Only the upstream gateway may call identity-bearing routes; it proves itself by sending the
/// shared `INTERNAL_TOKEN` as the `Authorization` header.
pub async fn verify_internal_ident(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, RouteError> {
    let authorized_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(RouteError::AuthError(StatusCode::UNAUTHORIZED))?;

    if !constant_time_cmp(authorized_header, &state.gateway_token) {
        tracing::warn!("rejected request with invalid gateway token");
        Err(RouteError::AuthError(StatusCode::UNAUTHORIZED))
    } else {
        Ok(next.run(req).await)
    }
}
