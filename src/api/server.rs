use std::net::SocketAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::num::ParseIntError;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::api::middleware::{self as api_middleware, MiddlewareErr};
use crate::engine::{Engine, EngineError};
use crate::util::env::{EnvErr, Var};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub gateway_token: String,
}

/// All routes, without CORS or a listener attached.
///
/// `/` and `/leaderboard` are public; everything else must come through the gateway and carry
/// the caller's identity.
pub fn app(state: Arc<AppState>) -> Router {
    let gateway_routes = Router::new()
        //
        // ledger
        .route("/ledger", post(record_action))
        .route("/ledger/recent", get(recent_actions))
        //
        // streaks
        .route("/checkin", post(checkin))
        .route("/checkin/streak", get(streak_status))
        //
        // tiers
        .route("/tier", get(tier_status))
        .route("/tier/resolve", get(resolve_tier))
        //
        // curriculum progress
        .route("/units/{unit_id}/complete", post(complete_item))
        .route("/units/{unit_id}/recompute", post(recompute_progress))
        .route("/units/{unit_id}/progress", get(unit_progress))
        .route("/units/{unit_id}/unlocked", get(unit_unlocked))
        //
        // caller's own standing
        .route("/leaderboard/me", get(my_rank))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            verify_internal_ident,
        ));

    Router::new()
        .merge(gateway_routes)
        .route("/", get(|| async { Response::new(Body::empty()) }))
        .route("/leaderboard", get(leaderboard))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

#[instrument(skip(state, tx))]
pub async fn router(state: Arc<AppState>, tx: UnboundedSender<SocketAddr>) -> Result<(), ServeErr> {
    let cors = api_middleware::cors().await?;
    let app = app(state).layer(cors);

    let port = var!(Var::ServerApiPort).await?.parse::<u16>()?;
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    if tx.send(socket_addr).is_err() {
        tracing::warn!("server ready receiver dropped");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

/// Custom error trace handler for `RouteError`-type responses
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(state, tx, rx))]
pub async fn start_server(
    state: Arc<AppState>,
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Vec<JoinHandle<()>> {
    tracing::info!("starting server");
    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = router(state, tx).await {
            tracing::error!(error = ?e, "server exited");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(msg) = rx.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", msg.port()),
                "server ready"
            );
        }
    });

    vec![server_handle, logging_handle]
}

#[derive(Debug, Error)]
pub enum ServeErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Middleware(#[from] MiddlewareErr),

    #[error("invalid SERVER_API_PORT: {0}")]
    Port(#[from] ParseIntError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    JsonRejection(#[from] JsonRejection),

    #[error(transparent)]
    QueryRejection(#[from] QueryRejection),

    #[error("{0}")]
    AuthError(StatusCode),
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        // only server-side failures are stashed for `log_route_errors`
        let (status, error, log) = match &self {
            RouteError::Engine(engine_err) => match engine_err {
                EngineError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, engine_err.to_string(), false)
                }
                EngineError::InvalidAction(_) => {
                    (StatusCode::BAD_REQUEST, engine_err.to_string(), false)
                }
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, engine_err.to_string(), false),
                EngineError::ConcurrentConflict => {
                    (StatusCode::CONFLICT, engine_err.to_string(), true)
                }
                EngineError::StorageUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    // the source may carry connection details, keep it in the logs only
                    String::from("storage unavailable, try again later"),
                    true,
                ),
            },

            RouteError::JsonRejection(rejection) => {
                (StatusCode::BAD_REQUEST, rejection.body_text(), false)
            }

            RouteError::QueryRejection(rejection) => {
                (StatusCode::BAD_REQUEST, rejection.body_text(), false)
            }

            RouteError::AuthError(status) => (
                status.to_owned(),
                String::from("invalid authorization header"),
                false,
            ),
        };

        let mut response = (status, Json(ErrorResponse { error })).into_response();
        if log {
            response.extensions_mut().insert(Arc::new(self));
        }

        response
    }
}
