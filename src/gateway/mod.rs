//! HTTP + WebSocket gateway: the network front door for the Agent Loop.
//!
//! Grounded on the teacher's `gateway/` module (`axum` Router, `tower-http`
//! CORS, a port-fallback bind loop, PID-file-on-start) but rewired against a
//! different, fixed route table — see [`routes`].

pub mod auth;
pub mod daemon;
pub mod routes;
pub mod ws;

pub use daemon::start_gateway;
pub use routes::{GatewayState, GatewayStateInner};
