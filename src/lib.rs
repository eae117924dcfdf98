//! A personal AI-assistant agent core: an `Engine`-agnostic reasoning loop,
//! a security policy pipeline, pluggable memory and tools, and an HTTP +
//! WebSocket gateway that exposes sessions to collaborator channels.

pub mod agent;
pub mod channels;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod event_bus;
pub mod gateway;
pub mod memory;
pub mod pairing;
pub mod security;
pub mod steering;
pub mod tools;
pub mod types;
pub mod workers;

/// Convenience re-exports for the most commonly used traits and types.
///
/// ```rust
/// use kestrel_core::prelude::*;
/// ```
pub mod prelude {
    // Core data model
    pub use crate::types::{
        AgentEvent, CancelToken, EngineEvent, Message, MessageRole, ToolCall, ToolResult, Usage,
    };

    // Agent loop
    pub use crate::agent::{AgentConfig, AgentLoop, SessionConfig, SessionManager, SessionRecord};

    // Engine abstraction
    pub use crate::engine::{Engine, EngineHandle, EngineRegistry, Job};

    // Context management
    pub use crate::context::{CompactionStrategy, ContextManager};

    // Steering
    pub use crate::steering::{SteeringMessage, SteeringQueue};

    // Worker pool
    pub use crate::workers::WorkerPool;

    // Tool system
    pub use crate::tools::{Tool, ToolContext, ToolRegistry, ToolWeight};

    // Memory subsystem
    pub use crate::memory::{Memory, MemoryCategory, MemoryEntry};

    // Security
    pub use crate::security::{AutonomyLevel, SecurityPolicy, ValidationResult};

    // Event bus
    pub use crate::event_bus::{AppEvent, EventBus, TokioBroadcastBus};

    // Pairing
    pub use crate::pairing::PairingManager;

    // Channel abstraction
    pub use crate::channels::{Channel, ChannelMessage};

    // Configuration
    pub use crate::config::{AppConfig, load_default_config};

    // Error taxonomy
    pub use crate::errors::{CoreError, Result};
}
