//! Agent Intelligence Layer — the core reasoning loop and session lifecycle.
//!
//! # Key types
//! - [`AgentLoop`] — drives a single session's run to completion
//! - [`AgentConfig`] — parameters for the loop (model, max iterations, etc.)
//! - [`SessionManager`] — tracks session lifecycle for the gateway

pub mod loop_;
pub mod session_router;

pub use loop_::{AgentConfig, AgentLoop, Verifier, VerificationContext};
pub use session_router::{SessionConfig, SessionManager, SessionRecord, SessionStatus};
