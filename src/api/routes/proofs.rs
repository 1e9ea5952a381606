//! Completion evidence endpoints.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use super::challenges::challenge_id;
use crate::api::types::{Empty, ProofResponse};
use crate::api::{ApiState, AuthUser};
use crate::error::{ApiError, ApiResult};

/// Form field carrying the proof file
const FILE_FIELD: &str = "file";

fn missing_file() -> ApiError {
    ApiError::InvalidRequest("Missing key.".to_string())
}

/// POST|PATCH /api/v1/challenges/:id/proofs
///
/// Accepts `multipart/form-data` with a `file` part.
pub async fn submit_proof(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ProofResponse>> {
    let id = challenge_id(&raw_id)?;
    let mut multipart = multipart.map_err(|e| {
        debug!("Rejected proof upload: {}", e);
        missing_file()
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        debug!("Malformed multipart body: {}", e);
        ApiError::InvalidRequest("Request body is malformed.".to_string())
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            debug!("Failed to read proof file: {}", e);
            ApiError::InvalidRequest("Request body is malformed.".to_string())
        })?;

        let proof_path = state
            .lifecycle
            .submit_proof(id, user_id, bytes.to_vec(), content_type.as_deref())
            .await?;
        return Ok(Json(ProofResponse { proof_path }));
    }

    Err(missing_file())
}

/// DELETE /api/v1/challenges/:id/proofs
pub async fn clear_proof(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state
        .lifecycle
        .clear_proof(challenge_id(&raw_id)?, user_id)
        .await?;
    Ok(Json(Empty {}))
}
