//! `GET /ws/{sessionId}?token=…` — used by a canvas/collab session manager.
//!
//! The core crate only validates the token and lazily creates the session
//! record; message semantics belong to whatever collaborator owns canvas
//! framing, per the gateway wire contract.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::routes::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<GatewayState>,
) -> Response {
    if let Some(pairing) = &state.pairing {
        let authorized = query.token.as_deref().map(|t| pairing.validate_token(t)).unwrap_or(false);
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    state.sessions.get_or_create(&session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(mut socket: WebSocket, session_id: String, state: GatewayState) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                tracing::debug!(session_id = %session_id, bytes = text.len(), "ws: message received");
                state.sessions.touch_session(&session_id);
                let echo = serde_json::json!({ "type": "ack", "sessionId": session_id });
                if socket.send(Message::Text(echo.to_string())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
