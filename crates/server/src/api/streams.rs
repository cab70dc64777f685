// Stream lifecycle endpoints and the viewer heartbeat.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use primal_common::{protocol::ws::SystemEvent, types::{Role, StreamRecord}};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::OkResponse,
    auth::middleware::{maybe_bearer_auth, require_bearer_auth, AuthenticatedUser, MaybeUser},
    db::{now_ms, NewStream},
    error::{ApiError, ErrorCode},
    state::AppState,
};

pub fn router(state: Arc<AppState>) -> Router {
    let require_auth = middleware::from_fn_with_state(state.tokens.clone(), require_bearer_auth);
    let maybe_auth = middleware::from_fn_with_state(state.tokens.clone(), maybe_bearer_auth);

    Router::new()
        .route("/api/streams/create", post(create_stream).route_layer(require_auth.clone()))
        .route("/api/streams/{id}/start", post(start_stream).route_layer(require_auth.clone()))
        .route("/api/streams/{id}/end", post(end_stream).route_layer(require_auth))
        .route("/api/streams/live", get(list_live_streams))
        .route("/api/streams/{id}", get(get_stream))
        .route("/api/streams/{id}/heartbeat", post(heartbeat).route_layer(maybe_auth))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateStreamRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateStreamResponse {
    ok: bool,
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct StreamsResponse {
    streams: Vec<StreamRecord>,
}

#[derive(Debug, Serialize)]
struct StreamResponse {
    stream: StreamRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatResponse {
    ok: bool,
    viewer_count: i64,
}

async fn create_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateStreamRequest>,
) -> Result<Json<CreateStreamResponse>, ApiError> {
    user.require_role(Role::Creator)?;

    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .unwrap_or("Untitled Stream")
        .to_owned();

    let stream =
        NewStream { id: Uuid::new_v4(), creator_id: user.user_id, title, created_at: now_ms() };
    state.db.create_stream(&stream).await?;

    Ok(Json(CreateStreamResponse { ok: true, id: stream.id }))
}

async fn list_live_streams(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StreamsResponse>, ApiError> {
    Ok(Json(StreamsResponse { streams: state.db.list_live_streams().await? }))
}

async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StreamResponse>, ApiError> {
    let stream = state
        .db
        .stream_by_id(id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "stream not found"))?;
    Ok(Json(StreamResponse { stream }))
}

async fn start_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    require_stream_control(&state, &user, id).await?;
    state.db.start_stream(id, now_ms()).await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn end_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    require_stream_control(&state, &user, id).await?;
    finish_stream(&state, id).await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(id): Path<Uuid>,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let session_id = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|session| !session.is_empty())
        .ok_or_else(|| ApiError::new(ErrorCode::ValidationFailed, "missing sessionId"))?;

    if state.db.stream_by_id(id).await?.is_none() {
        return Err(ApiError::new(ErrorCode::NotFound, "stream not found"));
    }

    let room = id.to_string();
    let viewer_count =
        state.presence.heartbeat(&room, session_id, user.map(|u| u.user_id)).await as i64;
    state.db.set_viewer_count(id, viewer_count).await?;

    Ok(Json(HeartbeatResponse { ok: true, viewer_count }))
}

/// Creators control their own streams; admins control any.
async fn require_stream_control(
    state: &AppState,
    user: &AuthenticatedUser,
    stream_id: Uuid,
) -> Result<StreamRecord, ApiError> {
    user.require_role(Role::Creator)?;
    let stream = state
        .db
        .stream_by_id(stream_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "stream not found"))?;
    if user.role != Role::Admin && stream.creator_id != user.user_id {
        return Err(ApiError::from_code(ErrorCode::AuthForbidden));
    }
    Ok(stream)
}

/// Shared by the creator end and the admin force-end paths: persist the
/// ended state, drop the room's presence records, and tell the room the
/// stream is over.
pub(crate) async fn finish_stream(state: &AppState, stream_id: Uuid) -> Result<(), ApiError> {
    if !state.db.end_stream(stream_id, now_ms()).await? {
        return Err(ApiError::new(ErrorCode::NotFound, "stream not found"));
    }

    let room = stream_id.to_string();
    state.presence.clear(&room).await;
    state
        .router
        .broadcast_system(&room, &SystemEvent::StreamEnded { stream_id: room.clone() })
        .await;
    Ok(())
}
