use std::{any::Any, fs, net::SocketAddr, path::PathBuf};

use axum::{
    extract::Request,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use super::{
    auth::auth_middleware,
    routes::{
        agent_card, create_session, delete_session, get_session, health, list_sessions, pair,
        steer_session, webhook, GatewayState,
    },
    ws::ws_handler,
};

const DEFAULT_PORT: u16 = 18790;
const MAX_PORT_ATTEMPTS: u16 = 10;

/// Path to the PID file written on daemon start.
pub fn pid_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".kestrel")
        .join("daemon.pid")
}

/// `CorsLayer`'s default preflight response is `200 OK`; rewrite it to the
/// `204 No Content` CORS convention expects, leaving every other response
/// untouched.
async fn rewrite_preflight_status(req: Request, next: Next) -> Response {
    let is_preflight = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    if is_preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
}

/// Start the HTTP gateway daemon, binding to `127.0.0.1` starting at port
/// [`DEFAULT_PORT`]. If that port is taken, increments up to
/// [`MAX_PORT_ATTEMPTS`] times before returning an error.
///
/// Writes `daemon.pid` on successful bind. Blocks until the server shuts down.
pub async fn start_gateway(state: GatewayState) -> Result<(), String> {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    let public = Router::new()
        .route("/health", get(health))
        .route("/.well-known/agent.json", get(agent_card))
        .route("/pair", post(pair));

    let protected = Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/steer", post(steer_session))
        .route("/webhooks/{name}", post(webhook))
        .route("/ws/{session_id}", get(ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(rewrite_preflight_status))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic));

    let listener = bind_with_fallback(DEFAULT_PORT).await?;
    let addr = listener.local_addr().map_err(|e| e.to_string())?;

    write_pid_file(addr.port())?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("daemon error: {e}"))
}

async fn bind_with_fallback(start_port: u16) -> Result<TcpListener, String> {
    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port + offset;
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("valid addr");
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(_) if offset + 1 < MAX_PORT_ATTEMPTS => continue,
            Err(e) => {
                return Err(format!(
                    "could not bind to any port in {start_port}-{}: {e}",
                    start_port + MAX_PORT_ATTEMPTS - 1
                ));
            }
        }
    }
    unreachable!()
}

fn write_pid_file(port: u16) -> Result<(), String> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create state dir: {e}"))?;
    }
    let content = format!("{}\n{}\n", std::process::id(), port);
    fs::write(&path, content).map_err(|e| format!("failed to write PID file: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    #[tokio::test]
    async fn options_preflight_returns_204() {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(cors)
            .layer(middleware::from_fn(rewrite_preflight_status));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .header("origin", "http://example.com")
                    .header("access-control-request-method", "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

