//! Route handlers for the bit-exact gateway wire contract.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{SessionConfig, SessionManager, SessionRecord, SessionStatus};
use crate::pairing::PairingManager;

/// Shared gateway state, cloned (cheaply, via `Arc`) into every handler.
pub type GatewayState = Arc<GatewayStateInner>;

pub struct GatewayStateInner {
    pub sessions: Arc<SessionManager>,
    pub pairing: Option<Arc<PairingManager>>,
    /// Contents of `GET /.well-known/agent.json`, if agent registration is configured.
    pub agent_card: Option<Value>,
    /// Names of webhooks accepted by `POST /webhooks/{name}`; empty disables the route.
    pub webhooks: Vec<String>,
}

/// A JSON `{"error": "..."}` response with a status code, per the gateway's
/// uniform failure-response contract.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn session_json(record: &SessionRecord) -> Value {
    json!({
        "sessionId": record.session_id,
        "channelId": record.channel_id,
        "userId": record.user_id,
        "status": match record.status() {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Ended => "ended",
        },
        "createdAt": record.created_at,
        "lastActiveAt": record.last_active_at,
    })
}

// ─── GET /health ──────────────────────────────────────────────────────────────

pub async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let mut body = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "sessions": state.sessions.session_count(),
    });
    if let Some(pairing) = &state.pairing {
        let stats = pairing.stats();
        body["pairing"] = json!({
            "activeCodes": stats.active_codes,
            "pairedClients": stats.paired_clients,
        });
    }
    Json(body)
}

// ─── GET /.well-known/agent.json ─────────────────────────────────────────────

pub async fn agent_card(State(state): State<GatewayState>) -> Response {
    match &state.agent_card {
        Some(card) => Json(card.clone()).into_response(),
        None => ApiError::not_found("agent registration not configured").into_response(),
    }
}

// ─── POST /pair ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub code: Option<String>,
    pub label: Option<String>,
}

pub async fn pair(State(state): State<GatewayState>, body: String) -> ApiResult<Json<Value>> {
    let Some(pairing) = &state.pairing else {
        return Err(ApiError::bad_request("pairing is disabled"));
    };
    let req: PairRequest = serde_json::from_str(&body)
        .map_err(|_| ApiError::bad_request("malformed pairing request"))?;
    let Some(code) = req.code.filter(|c| !c.is_empty()) else {
        return Err(ApiError::bad_request("malformed pairing request"));
    };
    match pairing.exchange_code(&code, req.label) {
        Some(token) => Ok(Json(json!({ "token": token, "paired": true }))),
        None => Err(ApiError::unauthorized("invalid or expired pairing code")),
    }
}

// ─── GET /sessions ────────────────────────────────────────────────────────────

pub async fn list_sessions(State(state): State<GatewayState>) -> Json<Value> {
    let sessions: Vec<Value> = state.sessions.list_sessions().iter().map(session_json).collect();
    Json(json!({ "sessions": sessions }))
}

// ─── POST /sessions ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(rename = "channelId")]
    pub channel_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: Option<String>,
}

pub async fn create_session(
    State(state): State<GatewayState>,
    Json(req): Json<CreateSessionRequest>,
) -> (StatusCode, Json<Value>) {
    let record = state.sessions.create_session(SessionConfig {
        channel_id: req.channel_id,
        user_id: req.user_id,
        system_prompt: req.system_prompt,
    });
    (StatusCode::CREATED, Json(session_json(&record)))
}

// ─── GET /sessions/{id} ───────────────────────────────────────────────────────

pub async fn get_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .sessions
        .get_session(&id)
        .map(|record| Json(session_json(&record)))
        .ok_or_else(|| ApiError::not_found(format!("session '{id}' not found")))
}

// ─── POST /sessions/{id}/steer ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SteerRequest {
    pub message: Option<String>,
}

pub async fn steer_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(req): Json<SteerRequest>,
) -> ApiResult<Json<Value>> {
    let Some(message) = req.message.filter(|m| !m.is_empty()) else {
        return Err(ApiError::bad_request("missing 'message'"));
    };
    if !state.sessions.touch_session(&id) {
        return Err(ApiError::not_found(format!("session '{id}' not found")));
    }
    Ok(Json(json!({
        "sessionId": id,
        "steered": true,
        "message": message,
    })))
}

// ─── DELETE /sessions/{id} ────────────────────────────────────────────────────

pub async fn delete_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.sessions.end_session(&id) {
        Ok(Json(json!({ "sessionId": id, "ended": true })))
    } else {
        Err(ApiError::not_found(format!("session '{id}' not found")))
    }
}

// ─── POST /webhooks/{name} ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[allow(dead_code)]
    pub message: Option<String>,
    #[serde(rename = "userId")]
    #[allow(dead_code)]
    pub user_id: Option<String>,
}

pub async fn webhook(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Json(_req): Json<WebhookRequest>,
) -> ApiResult<Json<Value>> {
    if !state.webhooks.iter().any(|w| w == &name) {
        return Err(ApiError::not_found(format!("webhook '{name}' not found")));
    }
    Ok(Json(json!({ "webhook": name, "accepted": true })))
}
