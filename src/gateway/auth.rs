//! Bearer-token auth middleware for protected gateway routes.
//!
//! Grounded on the teacher's single-static-token `auth_middleware`, replaced
//! with one that calls [`PairingManager::validate_token`] since the teacher's
//! one-token-per-daemon model predates multi-client pairing.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use super::routes::GatewayState;

/// Validates `Authorization: Bearer <token>` against the attached pairing
/// manager. When no pairing manager is configured, every request passes —
/// the gateway is then trusted to be reachable only from localhost.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(pairing) = &state.pairing else {
        return Ok(next.run(request).await);
    };

    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if pairing.validate_token(token) => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
