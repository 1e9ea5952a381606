//! Vote endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::challenges::challenge_id;
use crate::api::types::{Empty, ValidJson, VotePost};
use crate::api::{ApiState, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::views::VoteSummary;

/// POST /api/v1/challenges/:id/votes
///
/// The caller accuses `victimId`. Voting twice is not an error.
pub async fn submit_vote(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
    ValidJson(body): ValidJson<VotePost>,
) -> ApiResult<Json<Empty>> {
    let id = challenge_id(&raw_id)?;
    let victim_id = Uuid::parse_str(&body.victim_id)
        .map_err(|_| ApiError::InvalidRequest("Invalid userIds.".to_string()))?;

    state.votes.submit_vote(id, user_id, victim_id).await?;
    Ok(Json(Empty {}))
}

/// GET /api/v1/challenges/:id/votes
pub async fn show_votes(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Vec<VoteSummary>>> {
    Ok(Json(
        state.votes.show_votes(challenge_id(&raw_id)?, user_id).await?,
    ))
}
