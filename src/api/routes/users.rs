//! User endpoints: own profile, public profiles, search and walls.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::types::{parse_id, SearchQuery, ValidJson};
use crate::api::{ApiState, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::users::ProfilePatch;
use crate::views::{UserData, UserList};

/// GET /api/v1/self
pub async fn get_self(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<UserData>> {
    Ok(Json(state.users.profile(user_id).await?))
}

/// PATCH /api/v1/self
pub async fn patch_self(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(patch): ValidJson<ProfilePatch>,
) -> ApiResult<StatusCode> {
    state.users.patch(user_id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/self/recents
pub async fn get_recents(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<UserList>>> {
    Ok(Json(state.users.recents(user_id).await?))
}

/// GET /api/v1/users?search=q
pub async fn search_users(
    State(state): State<Arc<ApiState>>,
    AuthUser(_): AuthUser,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<UserList>>> {
    let search = query.search.unwrap_or_default();
    Ok(Json(state.users.search(&search).await?))
}

/// GET /api/v1/users/:user_id
pub async fn get_user(
    State(state): State<Arc<ApiState>>,
    AuthUser(_): AuthUser,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<UserList>> {
    let user_id = parse_id(&raw_id, || {
        ApiError::NotFound("User was not found.".to_string())
    })?;
    Ok(Json(state.users.public_profile(user_id).await?))
}

/// GET /api/v1/walls/global
pub async fn get_global_wall(
    State(state): State<Arc<ApiState>>,
    AuthUser(_): AuthUser,
) -> ApiResult<Json<Vec<UserList>>> {
    Ok(Json(state.users.global_wall().await?))
}

/// GET /api/v1/walls/self
pub async fn get_self_wall(
    State(state): State<Arc<ApiState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Vec<UserList>>> {
    Ok(Json(state.users.user_wall(user_id).await?))
}
