//! Live notification socket.
//!
//! The client connects to `/api/live?token=...`. The token is checked
//! before the upgrade; a bad token gets a plain 401 and no channel. Once
//! open, the server pushes notification JSON as text frames. Anything the
//! client sends is ignored until it closes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::AppError;
use crate::registry::{ChannelHandle, Inbox};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub token: Option<String>,
}

// GET /api/live
pub async fn live_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<LiveQuery>,
    State(state): State<SharedState>,
) -> Result<Response, AppError> {
    let (handle, inbox) = state
        .registry
        .register(query.token.as_deref(), &state.sessions)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, handle, inbox))
        .into_response())
}

// ── Socket lifecycle ───────────────────────────────────────────

async fn handle_socket(socket: WebSocket, state: SharedState, handle: ChannelHandle, mut inbox: Inbox) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Forward pushed frames. Ends when the registry drops our sender,
    // which happens on close or when a newer channel replaces this one.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.close(handle);
}
