// VOD metadata: listing and registration. The binary upload itself is
// handled by the external pipeline, which registers the playback path here.

use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use primal_common::types::{Role, VodRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::middleware::{require_bearer_auth, AuthenticatedUser},
    db::{now_ms, NewVod},
    error::{ApiError, ErrorCode},
    state::AppState,
};

const VOD_LISTING_LIMIT: usize = 200;

pub fn router(state: Arc<AppState>) -> Router {
    let require_auth = middleware::from_fn_with_state(state.tokens.clone(), require_bearer_auth);

    Router::new()
        .route("/api/vods", get(list_vods))
        .route("/api/vods/register", post(register_vod).route_layer(require_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct VodsResponse {
    vods: Vec<VodRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterVodRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    stream_id: Option<Uuid>,
    #[serde(default)]
    file_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterVodResponse {
    ok: bool,
    vod_id: Uuid,
    url: String,
}

async fn list_vods(State(state): State<Arc<AppState>>) -> Result<Json<VodsResponse>, ApiError> {
    Ok(Json(VodsResponse { vods: state.db.list_vods(VOD_LISTING_LIMIT).await? }))
}

async fn register_vod(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<RegisterVodRequest>,
) -> Result<Json<RegisterVodResponse>, ApiError> {
    user.require_role(Role::Creator)?;

    let file_path = payload.file_path.trim().to_owned();
    if file_path.is_empty() {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "missing filePath"));
    }

    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Untitled VOD")
        .to_owned();

    let vod = NewVod {
        id: Uuid::new_v4(),
        stream_id: payload.stream_id,
        creator_id: user.user_id,
        title,
        file_path,
        created_at: now_ms(),
    };
    state.db.insert_vod(&vod).await?;

    Ok(Json(RegisterVodResponse { ok: true, vod_id: vod.id, url: vod.file_path }))
}
