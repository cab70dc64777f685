// WebSocket transport for the room relay.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection task: pump outbound frames from the registry channel and
/// feed inbound text frames to the router.
///
/// A connection is tracked from upgrade, joins a room only once the client
/// sends a `join` envelope, and is torn down on the single exit path below —
/// however the transport dies, `handle_disconnect` runs exactly once.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();
    state.registry.register(connection_id, outbound_sender).await;
    debug!(%connection_id, "relay connection opened");

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(frame) => {
                        if socket.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        state.router.dispatch(connection_id, raw.as_str()).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    state.router.handle_disconnect(connection_id).await;
    debug!(%connection_id, "relay connection closed");
}
