//! Challenge endpoints.
//!
//! Everything except `GET /challenges/:id` requires a bearer token.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::api::types::{parse_id, ChallengePatchBody, ChallengePost, Empty, ValidJson, VetoPost};
use crate::api::{ApiState, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::types::ChallengeId;
use crate::views::{ChallengeData, ChallengeList, CreatedChallenge};

pub(crate) fn challenge_id(raw: &str) -> ApiResult<ChallengeId> {
    parse_id(raw, ApiError::challenge_not_found)
}

// ============================================================================
// OWNER
// ============================================================================

/// POST /api/v1/challenges
pub async fn create_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(body): ValidJson<ChallengePost>,
) -> ApiResult<Json<CreatedChallenge>> {
    let challenge_id = state.lifecycle.create(user_id, body.into()).await?;
    Ok(Json(CreatedChallenge { challenge_id }))
}

/// PATCH /api/v1/challenges/:id
pub async fn update_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
    ValidJson(body): ValidJson<ChallengePatchBody>,
) -> ApiResult<Json<Empty>> {
    state
        .lifecycle
        .update(challenge_id(&raw_id)?, user_id, body.into())
        .await?;
    Ok(Json(Empty {}))
}

/// DELETE /api/v1/challenges/:id
pub async fn delete_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state
        .lifecycle
        .remove(challenge_id(&raw_id)?, user_id)
        .await?;
    Ok(Json(Empty {}))
}

/// POST /api/v1/challenges/:id/vetoResults
pub async fn release_veto_results(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
    ValidJson(body): ValidJson<VetoPost>,
) -> ApiResult<Json<Empty>> {
    let id = challenge_id(&raw_id)?;
    let flagged = state
        .lifecycle
        .release_veto(id, user_id, &body.user_ids())
        .await?;
    info!("Released results of {} ({} vetoed)", id, flagged.len());
    Ok(Json(Empty {}))
}

// ============================================================================
// PARTICIPANTS
// ============================================================================

/// POST /api/v1/challenges/:id/accept
pub async fn accept_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state
        .lifecycle
        .accept(challenge_id(&raw_id)?, user_id)
        .await?;
    Ok(Json(Empty {}))
}

/// POST /api/v1/challenges/:id/reject
///
/// Succeeds when there is nothing to reject.
pub async fn reject_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    // an unparseable id names no participation
    if let Ok(id) = challenge_id(&raw_id) {
        state.lifecycle.reject(id, user_id).await?;
    }
    Ok(Json(Empty {}))
}

/// POST /api/v1/challenges/:id/complete
pub async fn complete_challenge(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state
        .lifecycle
        .complete(challenge_id(&raw_id)?, user_id)
        .await?;
    Ok(Json(Empty {}))
}

// ============================================================================
// QUERIES
// ============================================================================

/// GET /api/v1/challenges
pub async fn list_challenges(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<ChallengeList>> {
    Ok(Json(state.lifecycle.list_for_user(user_id).await?))
}

/// GET /api/v1/challenges/:id
///
/// No authentication required.
pub async fn show_challenge(
    State(state): State<Arc<ApiState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<ChallengeData>> {
    Ok(Json(state.lifecycle.show(challenge_id(&raw_id)?).await?))
}
