// Admin endpoints: account moderation and stream oversight.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use primal_common::types::{PublicUser, Role, StreamRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{streams::finish_stream, OkResponse},
    auth::middleware::{require_bearer_auth, AuthenticatedUser},
    error::{ApiError, ErrorCode},
    state::AppState,
};

const ADMIN_LISTING_LIMIT: usize = 500;

pub fn router(state: Arc<AppState>) -> Router {
    let require_auth = middleware::from_fn_with_state(state.tokens.clone(), require_bearer_auth);

    Router::new()
        .route("/api/admin/users", get(list_users).route_layer(require_auth.clone()))
        .route("/api/admin/users/{id}/role", post(set_role).route_layer(require_auth.clone()))
        .route("/api/admin/streams", get(list_streams).route_layer(require_auth.clone()))
        .route(
            "/api/admin/streams/{id}/force-end",
            post(force_end).route_layer(require_auth),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct UsersResponse {
    users: Vec<PublicUser>,
}

#[derive(Debug, Serialize)]
struct StreamsResponse {
    streams: Vec<StreamRecord>,
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    #[serde(default)]
    role: String,
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UsersResponse>, ApiError> {
    user.require_role(Role::Admin)?;
    Ok(Json(UsersResponse { users: state.db.list_users(ADMIN_LISTING_LIMIT).await? }))
}

async fn set_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    user.require_role(Role::Admin)?;

    let role = Role::from_db_value(&payload.role)
        .ok_or_else(|| ApiError::new(ErrorCode::ValidationFailed, "invalid role"))?;
    if !state.db.set_user_role(id, role).await? {
        return Err(ApiError::new(ErrorCode::NotFound, "user not found"));
    }

    Ok(Json(OkResponse { ok: true }))
}

async fn list_streams(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<StreamsResponse>, ApiError> {
    user.require_role(Role::Admin)?;
    Ok(Json(StreamsResponse { streams: state.db.list_streams(ADMIN_LISTING_LIMIT).await? }))
}

async fn force_end(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    user.require_role(Role::Admin)?;
    finish_stream(&state, id).await?;
    Ok(Json(OkResponse { ok: true }))
}
