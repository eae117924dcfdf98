//! TOML configuration schema for the agent core.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.kestrel/config.toml`:
//! ```toml
//! [provider]
//! default_id = "openai"
//! default_model = "gpt-4o-mini"
//!
//! [security]
//! autonomy_level = "supervised"
//!
//! [worker_pool]
//! max_workers = 4
//! task_timeout_secs = 60
//!
//! [gateway]
//! bind_address = "127.0.0.1"
//! port = 18790
//!
//! [pairing]
//! enabled = true
//! code_ttl_minutes = 10
//! token_ttl_days = 30
//! ```

use serde::{Deserialize, Serialize};

// ─── ProviderConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// ID of the default engine (e.g. `"openai"`, `"anthropic"`).
    pub default_id: String,
    /// Default model identifier (e.g. `"gpt-4o-mini"`, `"claude-3-haiku"`).
    pub default_model: String,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum retry attempts on transient errors.
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_id: "openai".to_owned(),
            default_model: "gpt-4o-mini".to_owned(),
            request_timeout_secs: 60,
            max_retries: 3,
        }
    }
}

// ─── SecurityConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Autonomy level: `"readonly"`, `"supervised"`, or `"full"`.
    pub autonomy_level: String,
    /// Optional workspace root path (restricts file tool access).
    pub workspace_root: Option<String>,
    /// Commands blocked regardless of autonomy level.
    pub blocked_commands: Vec<String>,
    /// Rate limit: max tool calls within the policy's rolling window.
    pub max_actions_per_window: usize,
    /// Width of the rate-limit window, in seconds.
    pub window_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            autonomy_level: "supervised".to_owned(),
            workspace_root: None,
            blocked_commands: Vec::new(),
            max_actions_per_window: 60,
            window_secs: 60,
        }
    }
}

// ─── ContextConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget before the Context Manager compacts history.
    pub max_tokens: usize,
    /// Named compaction strategy: `"sliding_window"`, `"summarize_coding"`, or
    /// `"drop_oldest_pinned"`.
    pub strategy: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 32_000,
            strategy: "sliding_window".to_owned(),
        }
    }
}

// ─── WorkerPoolConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum heavyweight tool tasks executing concurrently.
    pub max_workers: usize,
    /// Per-tool timeout in seconds (spec default 60s, max configurable 600s).
    pub task_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            task_timeout_secs: 60,
        }
    }
}

// ─── AgentConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentLoopConfig {
    /// Hard cap on engine⇄tool round trips within a single run.
    pub max_iterations: usize,
    /// Maximum retries on a retryable engine error before the run fails.
    pub max_retries: usize,
    /// Sampling temperature passed to the engine.
    pub temperature: f32,
    /// Max output tokens requested from the engine, if the engine respects it.
    pub max_tokens: u32,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_retries: 3,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

// ─── MemoryConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Whether the memory subsystem is enabled.
    pub enabled: bool,
    /// Maximum number of entries returned by recall.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recall_limit: 10,
        }
    }
}

// ─── GatewayConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket gateway binds to.
    pub bind_address: String,
    /// First port attempted; the daemon falls back to the next ports if taken.
    pub port: u16,
    /// Names of webhooks accepted by `POST /webhooks/{name}`; empty disables the route.
    pub webhooks: Vec<String>,
    /// Session idle threshold in milliseconds before `evictIdle` reclaims it.
    pub idle_eviction_ms: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_owned(),
            port: 18790,
            webhooks: Vec::new(),
            idle_eviction_ms: 30 * 60 * 1000,
        }
    }
}

// ─── PairingConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairingConfig {
    /// Whether the pairing manager is attached (and bearer auth enforced).
    pub enabled: bool,
    /// Pairing code time-to-live, in minutes.
    pub code_ttl_minutes: i64,
    /// Exchanged-token time-to-live, in days.
    pub token_ttl_days: i64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            code_ttl_minutes: 10,
            token_ttl_days: 30,
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.kestrel/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub security: SecurityConfig,
    pub context: ContextConfig,
    pub worker_pool: WorkerPoolConfig,
    pub agent: AgentLoopConfig,
    pub memory: MemoryConfig,
    pub gateway: GatewayConfig,
    pub pairing: PairingConfig,
}
