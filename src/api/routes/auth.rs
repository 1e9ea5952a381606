//! Login endpoint.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::types::{LoginPost, ValidJson};
use crate::api::ApiState;
use crate::error::ApiResult;
use crate::users::LoginResponse;

/// POST /api/v1/auth
///
/// Exchanges an identity provider token for a bearer token. The account is
/// created on first login. No authentication required.
pub async fn login(
    State(state): State<Arc<ApiState>>,
    ValidJson(body): ValidJson<LoginPost>,
) -> ApiResult<Json<LoginResponse>> {
    Ok(Json(state.users.login(&body.token).await?))
}
