use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use tracing::instrument;

use crate::api::identity::CurrentUser;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::models::checkin::{CheckinOutcome, StreakStatus};
use crate::db::models::leaderboard::{LeaderboardRow, RankSummary};
use crate::db::models::ledger::{ActionType, LedgerEntry, RecordRequest};
use crate::db::models::progress::{CompleteItemRequest, CompletionKind, UnitProgress, UnlockStatus};
use crate::db::models::{LimitQuery, PointsQuery, UnitId};
use crate::engine::EngineError;
use crate::engine::tier::TierResolution;
use crate::util::retry::with_backoff;

type QueryParam<T> = Result<Query<T>, QueryRejection>;
type JsonBody<T> = Result<Json<T>, JsonRejection>;

#[instrument(skip(state))]
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    query: QueryParam<LimitQuery>,
) -> JsonResult<Vec<LeaderboardRow>> {
    let Query(param) = query?;
    let rows = with_backoff(|| state.engine.project(param.limit)).await?;

    Ok(Json(rows))
}

#[instrument(skip(state))]
pub async fn my_rank(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> JsonResult<RankSummary> {
    match with_backoff(|| state.engine.rank_of(&user)).await? {
        Some(rank) => Ok(Json(rank)),
        None => Err(EngineError::NotFound(format!("ranking for '{user}'")).into()),
    }
}

/// `201 Created` for a new entry, `200 OK` with the existing entry when the action key was
/// already awarded
#[instrument(skip(state, body))]
pub async fn record_action(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: JsonBody<RecordRequest>,
) -> Result<Response, RouteError> {
    let Json(req) = body?;
    let action_type = req
        .action_type
        .parse::<ActionType>()
        .map_err(EngineError::InvalidAction)?;

    let recorded = with_backoff(|| {
        state.engine.record(
            &user,
            action_type,
            req.points,
            req.action_key.clone(),
            req.metadata.clone(),
        )
    })
    .await?;

    let status = if recorded.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(recorded)).into_response())
}

#[instrument(skip(state))]
pub async fn recent_actions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    query: QueryParam<LimitQuery>,
) -> JsonResult<Vec<LedgerEntry>> {
    let Query(param) = query?;
    let entries = with_backoff(|| state.engine.list_recent(&user, param.limit)).await?;

    Ok(Json(entries))
}

#[instrument(skip(state))]
pub async fn checkin(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> JsonResult<CheckinOutcome> {
    Ok(Json(with_backoff(|| state.engine.checkin(&user)).await?))
}

#[instrument(skip(state))]
pub async fn streak_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> JsonResult<StreakStatus> {
    Ok(Json(with_backoff(|| state.engine.streak_status(&user)).await?))
}

#[instrument(skip(state))]
pub async fn tier_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> JsonResult<TierResolution> {
    Ok(Json(with_backoff(|| state.engine.tier_status(&user)).await?))
}

#[instrument(skip(state))]
pub async fn resolve_tier(
    State(state): State<Arc<AppState>>,
    query: QueryParam<PointsQuery>,
) -> JsonResult<TierResolution> {
    let Query(param) = query?;
    Ok(Json(state.engine.resolve_tier(param.points)?))
}

#[instrument(skip(state, body))]
pub async fn complete_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(unit_id): Path<String>,
    body: JsonBody<CompleteItemRequest>,
) -> JsonResult<UnitProgress> {
    let Json(req) = body?;
    let kind = req
        .kind
        .parse::<CompletionKind>()
        .map_err(EngineError::InvalidAction)?;
    let unit = UnitId::from(unit_id);

    let progress = with_backoff(|| {
        state
            .engine
            .complete_item(&user, &unit, kind, &req.item_id)
    })
    .await?;

    Ok(Json(progress))
}

#[instrument(skip(state))]
pub async fn recompute_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(unit_id): Path<String>,
) -> JsonResult<UnitProgress> {
    let unit = UnitId::from(unit_id);
    Ok(Json(with_backoff(|| state.engine.recompute(&user, &unit)).await?))
}

#[instrument(skip(state))]
pub async fn unit_progress(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(unit_id): Path<String>,
) -> JsonResult<UnitProgress> {
    let unit = UnitId::from(unit_id);
    Ok(Json(with_backoff(|| state.engine.progress(&user, &unit)).await?))
}

#[instrument(skip(state))]
pub async fn unit_unlocked(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(unit_id): Path<String>,
) -> JsonResult<UnlockStatus> {
    let unit = UnitId::from(unit_id);
    let unlocked = with_backoff(|| state.engine.check_prerequisites(&user, &unit)).await?;

    Ok(Json(UnlockStatus { unlocked }))
}
