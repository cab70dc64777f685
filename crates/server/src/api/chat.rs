// Chat history and sending. Messages are persisted, then fanned out to the
// stream's room through the relay.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use primal_common::types::ChatMessageRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::OkResponse,
    auth::middleware::{require_bearer_auth, AuthenticatedUser},
    db::{now_ms, NewChatMessage},
    error::{ApiError, ErrorCode},
    state::AppState,
};

const CHAT_HISTORY_LIMIT: usize = 200;
const MAX_MESSAGE_CHARS: usize = 240;

pub fn router(state: Arc<AppState>) -> Router {
    let require_auth = middleware::from_fn_with_state(state.tokens.clone(), require_bearer_auth);

    Router::new()
        .route("/api/chat/{stream_id}", get(chat_history))
        .route("/api/chat/{stream_id}/send", post(send_message).route_layer(require_auth))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    messages: Vec<ChatMessageRecord>,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    #[serde(default)]
    message: String,
}

/// The `chat` event broadcast to the stream's room after a send.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatBroadcast<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    stream_id: Uuid,
    id: Uuid,
    username: &'a str,
    badge: &'static str,
    message: &'a str,
    created_at: i64,
}

async fn chat_history(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ApiError> {
    Ok(Json(MessagesResponse {
        messages: state.db.chat_messages(stream_id, CHAT_HISTORY_LIMIT).await?,
    }))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(stream_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let message = payload.message.trim().to_owned();
    if message.is_empty() {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "empty message"));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::new(ErrorCode::ValidationFailed, "message too long"));
    }

    let stream = state
        .db
        .stream_by_id(stream_id)
        .await?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "stream not found"))?;
    if !stream.is_live {
        return Err(ApiError::from_code(ErrorCode::StreamOffline));
    }

    let sender = state
        .db
        .user_by_id(user.user_id)
        .await?
        .ok_or_else(|| ApiError::from_code(ErrorCode::AuthRequired))?;

    let record = NewChatMessage {
        id: Uuid::new_v4(),
        stream_id,
        user_id: sender.id,
        username_snapshot: sender.username.clone(),
        message,
        created_at: now_ms(),
    };
    state.db.insert_chat_message(&record).await?;

    let broadcast = ChatBroadcast {
        kind: "chat",
        stream_id,
        id: record.id,
        username: &sender.username,
        badge: sender.role.badge(),
        message: &record.message,
        created_at: record.created_at,
    };
    state.router.broadcast_system(&stream_id.to_string(), &broadcast).await;

    Ok(Json(OkResponse { ok: true }))
}
