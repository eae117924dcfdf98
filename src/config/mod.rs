//! Layered configuration: defaults → `config.toml` file → environment overrides.

pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_default_config, save_config};
pub use schema::{
    AgentLoopConfig, AppConfig, ContextConfig, GatewayConfig, MemoryConfig, PairingConfig,
    ProviderConfig, SecurityConfig, WorkerPoolConfig,
};
