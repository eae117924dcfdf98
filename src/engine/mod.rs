//! The Engine abstraction: a pluggable LLM backend that turns a [`Job`] into
//! a stream of [`EngineEvent`]s.
//!
//! Grounded on the teacher's `ai::provider::LLMProvider`, collapsed from two
//! methods (`complete`/`stream`) into one (`start_run`) so every engine,
//! streaming or not, is driven identically by the agent loop's yield point B.

pub mod openai_compatible;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

use crate::errors::EngineError;
use crate::types::{CancelToken, EngineEvent, Message};

/// JSON-schema description of a tool, as handed to the engine for
/// function-calling. Shape mirrors the OpenAI `tools` array entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One request for the engine to drive to completion (or to cancellation).
#[derive(Debug, Clone)]
pub struct Job {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = EngineEvent> + Send>>;

/// A running engine call. The agent loop polls `events` at yield point B,
/// checking `cancel` between chunks so a steered abort can stop consumption
/// without waiting for the engine to notice on its own.
pub struct EngineHandle {
    pub events: EventStream,
    cancel: CancelToken,
    steer_tx: Option<tokio::sync::mpsc::UnboundedSender<String>>,
}

impl EngineHandle {
    /// Build a handle over `events`, tied to the `cancel` token the run was
    /// started with.
    pub fn new(events: EventStream, cancel: CancelToken) -> Self {
        Self { events, cancel, steer_tx: None }
    }

    /// Attach a channel the engine reads mid-run steering messages from.
    /// Engines that can't act on steering mid-flight may leave this unset.
    pub fn with_steer_channel(mut self, steer_tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        self.steer_tx = Some(steer_tx);
        self
    }

    /// Request the run stop at its next cancellation check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Forward a steering message to the engine, if it registered a channel
    /// for one. A no-op otherwise.
    pub fn steer(&self, message: String) {
        if let Some(tx) = &self.steer_tx {
            let _ = tx.send(message);
        }
    }
}

/// A pluggable LLM backend.
#[async_trait]
pub trait Engine: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn context_limit(&self) -> usize;
    fn supports_tools(&self) -> bool;

    /// Start driving `job`. Returns immediately with a handle streaming
    /// events; does not block for the full completion.
    async fn start_run(&self, job: Job, cancel: CancelToken) -> Result<EngineHandle, EngineError>;
}

/// Factory for engines configured from [`crate::config`].
pub struct EngineRegistry {
    engines: std::collections::HashMap<String, std::sync::Arc<dyn Engine>>,
    default_id: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: std::collections::HashMap::new(),
            default_id: None,
        }
    }

    pub fn register(&mut self, engine: std::sync::Arc<dyn Engine>) {
        let id = engine.id().to_string();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.engines.insert(id, engine);
    }

    pub fn get(&self, id: &str) -> Option<std::sync::Arc<dyn Engine>> {
        self.engines.get(id).cloned()
    }

    pub fn default_engine(&self) -> Option<std::sync::Arc<dyn Engine>> {
        self.default_id.as_ref().and_then(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;
    use futures::stream;

    struct StubEngine {
        id: String,
    }

    #[async_trait]
    impl Engine for StubEngine {
        fn id(&self) -> &str {
            &self.id
        }
        fn name(&self) -> &str {
            "stub"
        }
        fn context_limit(&self) -> usize {
            8_192
        }
        fn supports_tools(&self) -> bool {
            false
        }
        async fn start_run(
            &self,
            _job: Job,
            cancel: CancelToken,
        ) -> Result<EngineHandle, EngineError> {
            let events = vec![
                EngineEvent::Started,
                EngineEvent::Completed {
                    answer: "hi".into(),
                    usage: Usage::default(),
                },
            ];
            Ok(EngineHandle::new(Box::pin(stream::iter(events)), cancel))
        }
    }

    #[test]
    fn registry_first_registration_becomes_default() {
        let mut reg = EngineRegistry::new();
        assert!(reg.is_empty());
        reg.register(std::sync::Arc::new(StubEngine { id: "a".into() }));
        reg.register(std::sync::Arc::new(StubEngine { id: "b".into() }));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.default_engine().unwrap().id(), "a");
        assert_eq!(reg.get("b").unwrap().id(), "b");
        assert!(reg.get("missing").is_none());
    }

    #[tokio::test]
    async fn stub_engine_streams_events() {
        let engine = StubEngine { id: "a".into() };
        let job = Job {
            model: "test".into(),
            messages: vec![],
            tools: vec![],
            temperature: None,
            max_tokens: None,
        };
        let mut handle = engine.start_run(job, CancelToken::new()).await.unwrap();
        let mut count = 0;
        use futures::StreamExt;
        while handle.events.next().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
