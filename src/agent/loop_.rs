//! `AgentLoop` — drives a single session's run to completion against a
//! pluggable [`Engine`], streaming [`AgentEvent`]s to the caller.
//!
//! # Algorithm
//!
//! ```text
//! yield point A (drain steering, check cancel)
//!       │
//!       ▼
//! engine.start_run(job)  ──► retry with backoff on retryable failure
//!       │
//!       ▼
//! consume event stream (yield point B between chunks)
//!       │
//!       ├─ completed, no pending tool calls ──► emit complete, done
//!       │
//!       └─ pending tool calls ──► execute sequentially (yield point C before each)
//!                                        │
//!                                        ▼
//!                                 loop back to yield point A
//! ```
//!
//! Grounded on the teacher's `AgentLoop` (same `tracing::instrument` usage,
//! same cancellation-flag idiom) but restructured around the [`Engine`]
//! streaming abstraction and the validation/snapshot/sanitisation contract
//! around each tool call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::context::ContextManager;
use crate::engine::{Engine, Job, ToolSpec};
use crate::memory::traits::{Memory, MemoryCategory};
use crate::security::SecurityPolicy;
use crate::steering::{SteeringMessage, SteeringQueue};
use crate::tools::{Tool, ToolContext, ToolRegistry};
use crate::types::{AgentEvent, CancelToken, EngineEvent, Message, StateSnapshot, ToolCall, ToolResult, Usage};
use crate::workers::WorkerPool;

/// Runtime configuration for an [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Upper bound on engine-run iterations before the run is forcibly failed.
    pub max_iterations: usize,
    /// Upper bound on consecutive retryable engine failures before giving up.
    pub max_retries: usize,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(4096),
            max_iterations: 50,
            max_retries: 3,
            system_prompt: String::new(),
        }
    }
}

/// Inputs handed to a [`Verifier`] after a run produces a final answer.
pub struct VerificationContext {
    pub task_description: String,
    pub final_answer: String,
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolResult>,
    pub state_snapshots: Vec<StateSnapshot>,
}

/// Optional task-level verification pass run after a final answer exists.
/// A crash here is reported but never changes the run's terminal outcome.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, ctx: VerificationContext) -> crate::types::VerificationResult;
}

/// Replace a leading home-directory prefix with `./` so paths embedded in
/// prompts or tool context don't leak the operator's home directory.
pub fn sanitize_workspace_path(cwd: &str) -> String {
    if let Some(home) = dirs::home_dir() {
        let home_str = home.to_string_lossy();
        if let Some(rest) = cwd.strip_prefix(home_str.as_ref()) {
            let rest = rest.trim_start_matches('/');
            return if rest.is_empty() {
                "./".to_string()
            } else {
                format!("./{rest}")
            };
        }
    }
    cwd.to_string()
}

fn backoff_delay(consecutive_errors: usize) -> Duration {
    let secs = 1u64 << consecutive_errors.saturating_sub(1).min(5);
    Duration::from_secs(secs.min(30))
}

async fn sleep_honouring_cancel(duration: Duration, cancel: &CancelToken) {
    const STEP: Duration = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return;
        }
        let chunk = remaining.min(STEP);
        tokio::time::sleep(chunk).await;
        remaining -= chunk;
    }
}

/// Drives one session's run to completion, emitting [`AgentEvent`]s over a
/// channel-backed stream.
pub struct AgentLoop {
    session_id: String,
    engine: Arc<dyn Engine>,
    tools: Arc<ToolRegistry>,
    worker_pool: Arc<WorkerPool>,
    policy: Arc<SecurityPolicy>,
    memory: Option<Arc<dyn Memory>>,
    engine_registry: Option<Arc<crate::engine::EngineRegistry>>,
    verifier: Option<Arc<dyn Verifier>>,
    config: AgentConfig,
    steering: Arc<SteeringQueue>,
    cancel: Mutex<Option<CancelToken>>,
}

impl AgentLoop {
    pub fn new(
        engine: Arc<dyn Engine>,
        tools: Arc<ToolRegistry>,
        worker_pool: Arc<WorkerPool>,
        policy: Arc<SecurityPolicy>,
        config: AgentConfig,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            engine,
            tools,
            worker_pool,
            policy,
            memory: None,
            engine_registry: None,
            verifier: None,
            config,
            steering: Arc::new(SteeringQueue::new()),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_engine_registry(mut self, registry: Arc<crate::engine::EngineRegistry>) -> Self {
        self.engine_registry = Some(registry);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Push an abort steering message and fire the current run's cancel
    /// signal, if one is in flight.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.steering.push(SteeringMessage::Abort { reason });
        if let Some(cancel) = self.cancel.lock().expect("agent loop cancel mutex poisoned").as_ref() {
            cancel.cancel();
        }
    }

    /// Enqueue a steering message to be drained at the next yield point.
    pub fn steer(&self, message: SteeringMessage) {
        self.steering.push(message);
    }

    /// Forward a raw string to the engine's stdin. Only meaningful for
    /// subprocess engines that prompt interactively; a no-op otherwise.
    pub fn steer_engine(&self, raw: String) {
        tracing::debug!(bytes = raw.len(), "steer_engine has no effect on non-interactive engines");
    }

    /// Start a run against `initial_message`, returning a stream of
    /// [`AgentEvent`]s that terminates after exactly one terminal event.
    pub fn run(self: Arc<Self>, initial_message: Message) -> UnboundedReceiverStream<AgentEvent> {
        let (tx, rx) = unbounded_channel();
        let cancel = CancelToken::new();
        *self.cancel.lock().expect("agent loop cancel mutex poisoned") = Some(cancel.clone());
        tokio::spawn(async move {
            self.drive(initial_message, cancel, tx).await;
        });
        UnboundedReceiverStream::new(rx)
    }

    #[tracing::instrument(name = "agent.run", skip_all, fields(model = %self.config.model))]
    async fn drive(self: Arc<Self>, initial_message: Message, cancel: CancelToken, tx: UnboundedSender<AgentEvent>) {
        tracing::info!(event = "session_start");
        let started = std::time::Instant::now();

        let mut ctx = ContextManager::new(self.engine.context_limit());
        if !self.config.system_prompt.is_empty() {
            ctx.set_system_prompt(self.config.system_prompt.clone());
        }

        let task_description = initial_message.content.clone();

        if let Some(mem) = &self.memory
            && let Ok(entries) = mem.recall(&task_description, 5).await
            && !entries.is_empty()
        {
            let recalled = entries
                .iter()
                .map(|e| format!("- {}: {}", e.key, e.content))
                .collect::<Vec<_>>()
                .join("\n");
            ctx.add_message(Message::system(format!("Relevant context from memory:\n{recalled}")));
        }

        ctx.add_message(initial_message);

        let tool_specs: Vec<ToolSpec> = self
            .tools
            .list()
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description,
                parameters: t.schema,
            })
            .collect();

        let mut iteration = 0usize;
        let mut consecutive_errors = 0usize;
        let mut tool_results: Vec<ToolResult> = Vec::new();
        let mut state_snapshots: Vec<StateSnapshot> = Vec::new();
        let mut final_answer: Option<(String, Usage)> = None;
        let mut terminal: Option<AgentEvent> = None;

        'outer: while iteration < self.config.max_iterations {
            // ── Yield point A ──────────────────────────────────────────────
            let drained = self.steering.drain();
            if let Some(reason) = abort_reason(&drained) {
                terminal = Some(AgentEvent::Aborted { reason });
                break;
            }
            apply_steering(&drained, &mut ctx);
            if cancel.is_cancelled() {
                terminal = Some(AgentEvent::Aborted { reason: "cancelled".to_string() });
                break;
            }

            // ── Start an engine run, retrying on retryable failure ─────────
            let job = Job {
                model: self.config.model.clone(),
                messages: ctx.get_messages().to_vec(),
                tools: tool_specs.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let mut handle = loop {
                match self.engine.start_run(job.clone(), cancel.clone()).await {
                    Ok(h) => {
                        consecutive_errors = 0;
                        break h;
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        tracing::warn!(error = %e.message, retryable = e.retryable, attempt = consecutive_errors, "engine start failed");
                        if !e.retryable || consecutive_errors >= self.config.max_retries {
                            terminal = Some(AgentEvent::Error { message: e.message });
                            break 'outer;
                        }
                        sleep_honouring_cancel(backoff_delay(consecutive_errors), &cancel).await;
                        if cancel.is_cancelled() {
                            terminal = Some(AgentEvent::Aborted { reason: "cancelled".to_string() });
                            break 'outer;
                        }
                    }
                }
            };

            // ── Consume the event stream ────────────────────────────────────
            let mut accumulated_text = String::new();
            let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
            let mut run_error: Option<(String, bool)> = None;
            let mut completed_answer: Option<(String, Usage)> = None;

            loop {
                if cancel.is_cancelled() {
                    terminal = Some(AgentEvent::Aborted { reason: "cancelled".to_string() });
                    break 'outer;
                }
                // ── Yield point B ────────────────────────────────────────
                if self.steering.has_abort() {
                    cancel.cancel();
                    let drained = self.steering.drain();
                    let reason = abort_reason(&drained).unwrap_or_else(|| "aborted".to_string());
                    terminal = Some(AgentEvent::Aborted { reason });
                    break 'outer;
                }

                let Some(event) = handle.events.next().await else {
                    break;
                };

                match event {
                    EngineEvent::Started => {}
                    EngineEvent::TextDelta { delta } => {
                        accumulated_text.push_str(&delta);
                        let _ = tx.send(AgentEvent::Text {
                            delta,
                            partial: accumulated_text.clone(),
                        });
                    }
                    EngineEvent::ThinkingDelta { delta } => {
                        let _ = tx.send(AgentEvent::Thinking { delta });
                    }
                    EngineEvent::ToolStart { id, tool, args } => {
                        pending_tool_calls.push(ToolCall { id, name: tool, args });
                    }
                    EngineEvent::ToolProgress { update } => {
                        if let Some(last) = pending_tool_calls.last() {
                            let _ = tx.send(AgentEvent::ToolProgress {
                                id: last.id.clone(),
                                update,
                            });
                        }
                    }
                    EngineEvent::ToolEnd { id, result } => {
                        let _ = tx.send(AgentEvent::ToolEnd {
                            id,
                            tool: "engine".to_string(),
                            result,
                        });
                    }
                    EngineEvent::Error { message, retryable } => {
                        run_error = Some((message, retryable));
                        break;
                    }
                    EngineEvent::Completed { answer, usage } => {
                        completed_answer = Some((answer, usage));
                    }
                }
            }

            if let Some((message, retryable)) = run_error {
                consecutive_errors += 1;
                if !retryable || consecutive_errors >= self.config.max_retries {
                    terminal = Some(AgentEvent::Error { message });
                    break;
                }
                sleep_honouring_cancel(backoff_delay(consecutive_errors), &cancel).await;
                continue;
            }

            if completed_answer.is_some() && pending_tool_calls.is_empty() {
                let (answer, usage) = completed_answer.unwrap();
                ctx.add_message(Message::assistant(answer.clone()));
                final_answer = Some((answer.clone(), usage));
                terminal = Some(AgentEvent::Complete { answer, usage });
                break;
            }

            if !pending_tool_calls.is_empty() {
                ctx.add_message(Message::assistant_with_tool_calls(
                    accumulated_text.clone(),
                    pending_tool_calls.clone(),
                ));

                for call in &pending_tool_calls {
                    // ── Yield point C ────────────────────────────────────
                    let drained = self.steering.drain();
                    if let Some(reason) = abort_reason(&drained) {
                        terminal = Some(AgentEvent::Aborted { reason });
                        break 'outer;
                    }
                    apply_steering(&drained, &mut ctx);
                    if cancel.is_cancelled() {
                        terminal = Some(AgentEvent::Aborted { reason: "cancelled".to_string() });
                        break 'outer;
                    }

                    let Some(tool) = self.tools.get(&call.name) else {
                        let _ = tx.send(AgentEvent::ToolValidationError {
                            tool: call.name.clone(),
                            errors: vec!["Tool not found".to_string()],
                        });
                        ctx.add_message(Message::tool(
                            format!("[VALIDATION ERROR] Tool not found: {}", call.name),
                            call.id.clone(),
                        ));
                        continue;
                    };

                    let validation = tool
                        .validate(&call.args)
                        .unwrap_or_else(|| crate::tools::traits::default_validate(&call.args));
                    if !validation.valid {
                        let _ = tx.send(AgentEvent::ToolValidationError {
                            tool: call.name.clone(),
                            errors: validation.errors.clone(),
                        });
                        ctx.add_message(Message::tool(
                            format!(
                                "[VALIDATION ERROR] Invalid arguments for tool {}: {}",
                                call.name,
                                validation.errors.join("; ")
                            ),
                            call.id.clone(),
                        ));
                        continue;
                    }

                    let call_id = call.id.clone();
                    let tx_progress = tx.clone();
                    let tool_ctx = ToolContext {
                        session_id: self.session_id.clone(),
                        cwd: sanitize_workspace_path(
                            &std::env::current_dir()
                                .map(|p| p.to_string_lossy().to_string())
                                .unwrap_or_default(),
                        ),
                        security_policy: self.policy.clone(),
                        cancel: cancel.clone(),
                        on_progress: Some(Arc::new(move |update: String| {
                            let _ = tx_progress.send(AgentEvent::ToolProgress {
                                id: call_id.clone(),
                                update,
                            });
                        })),
                        memory: self.memory.clone(),
                        engine_registry: self.engine_registry.clone(),
                        extensions: std::collections::HashMap::new(),
                    };

                    let pre_snapshot = tool.get_state_snapshot(&call.args, &tool_ctx).await;

                    let mut result = if tool.weight() == crate::tools::ToolWeight::Heavyweight {
                        match self
                            .worker_pool
                            .execute(tool.clone(), call.args.clone(), cancel.clone(), tool_ctx.clone())
                            .await
                        {
                            Ok(r) => r,
                            Err(e) => ToolResult::err(e.to_string()),
                        }
                    } else {
                        match tool.execute(call.args.clone(), &tool_ctx).await {
                            Ok(r) => r,
                            Err(e) => ToolResult::err(e),
                        }
                    };

                    let post_snapshot = tool.get_state_snapshot(&call.args, &tool_ctx).await;
                    if let Some(pre) = pre_snapshot {
                        let metadata = result.metadata.take().unwrap_or_else(|| serde_json::json!({}));
                        let mut metadata = metadata;
                        if let serde_json::Value::Object(ref mut map) = metadata {
                            map.insert("pre_snapshot".to_string(), serde_json::to_value(pre).unwrap_or_default());
                        }
                        result.metadata = Some(metadata);
                    }
                    if let Some(post) = post_snapshot.clone() {
                        result.state_snapshot = Some(post);
                    }

                    tool_results.push(result.clone());
                    if let Some(snap) = post_snapshot {
                        state_snapshots.push(snap);
                    }
                    let _ = tx.send(AgentEvent::ToolEnd {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        result: result.clone(),
                    });

                    let sanitized = self.policy.sanitize_output(result.context_text());
                    if sanitized.redacted {
                        tracing::warn!(
                            event = "secret_redacted",
                            tool = %call.name,
                            patterns = ?sanitized.redacted_patterns,
                        );
                    }

                    ctx.add_message(Message::tool(sanitized.clean, call.id.clone()));
                }

                iteration += 1;
                continue;
            }

            // Accumulated text without explicit completion and no tool calls.
            if !accumulated_text.is_empty() {
                ctx.add_message(Message::assistant(accumulated_text.clone()));
                final_answer = Some((accumulated_text.clone(), Usage::default()));
                terminal = Some(AgentEvent::Complete {
                    answer: accumulated_text,
                    usage: Usage::default(),
                });
                break;
            }

            // Engine produced nothing at all: treat as a non-retryable error.
            terminal = Some(AgentEvent::Error {
                message: "engine produced no output".to_string(),
            });
            break;
        }

        if terminal.is_none() {
            terminal = Some(AgentEvent::Error {
                message: "Agent loop exceeded maximum iterations".to_string(),
            });
        }

        if let (Some(verifier), Some((answer, _usage))) = (&self.verifier, &final_answer) {
            let verify_ctx = VerificationContext {
                task_description: task_description.clone(),
                final_answer: answer.clone(),
                messages: ctx.get_messages().to_vec(),
                tool_results: tool_results.clone(),
                state_snapshots: state_snapshots.clone(),
            };
            let result = verifier.verify(verify_ctx).await;
            let _ = tx.send(AgentEvent::Verification { result: result.clone() });
            if matches!(
                result.outcome,
                crate::types::VerificationOutcome::Partial | crate::types::VerificationOutcome::Failure
            ) {
                let suggestions = result
                    .suggestions
                    .iter()
                    .map(|s| format!("- {s}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                ctx.add_message(Message::system(format!(
                    "[VERIFICATION {:?}] {}\nSuggestions:\n{}",
                    result.outcome,
                    result.reasoning.clone().unwrap_or_default(),
                    suggestions
                )));
            }
        }

        if let (Some(mem), Some((answer, _))) = (&self.memory, &final_answer) {
            let key = format!("session:{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
            let summary = if answer.len() > 200 { format!("{}…", &answer[..200]) } else { answer.clone() };
            let _ = mem
                .store(&key, &format!("Task: {task_description}\nAnswer: {summary}"), MemoryCategory::Conversation)
                .await;
        }

        tracing::info!(
            event = "session_end",
            duration_ms = started.elapsed().as_millis() as u64,
            iterations = iteration,
            tool_calls = tool_results.len(),
        );

        if let Some(event) = terminal {
            let _ = tx.send(event);
        }
    }
}

fn abort_reason(drained: &[SteeringMessage]) -> Option<String> {
    drained.iter().find_map(|m| match m {
        SteeringMessage::Abort { reason } => Some(reason.clone()),
        _ => None,
    })
}

fn apply_steering(drained: &[SteeringMessage], ctx: &mut ContextManager) {
    for message in drained {
        match message {
            SteeringMessage::Abort { .. } => {}
            SteeringMessage::Inject { content } => ctx.add_message(Message::user(content.clone())),
            SteeringMessage::Priority { content } => {
                ctx.add_message(Message::user(format!("[PRIORITY] {content}")))
            }
            SteeringMessage::ContextUpdate { content } => ctx.set_system_prompt(content.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineHandle;
    use crate::errors::EngineError;
    use crate::security::AutonomyLevel;
    use crate::tools::traits::{ArgValidation, ToolWeight};
    use crate::workers::WorkerPoolConfig;
    use futures::stream;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedEngine {
        batches: Mutex<Vec<Vec<EngineEvent>>>,
    }

    impl ScriptedEngine {
        fn new(batches: Vec<Vec<EngineEvent>>) -> Arc<Self> {
            Arc::new(Self { batches: Mutex::new(batches) })
        }
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        fn id(&self) -> &str {
            "scripted"
        }
        fn name(&self) -> &str {
            "scripted"
        }
        fn context_limit(&self) -> usize {
            32_000
        }
        fn supports_tools(&self) -> bool {
            true
        }
        async fn start_run(&self, _job: Job, cancel: CancelToken) -> Result<EngineHandle, EngineError> {
            let mut batches = self.batches.lock().unwrap();
            let events = if batches.is_empty() { vec![] } else { batches.remove(0) };
            Ok(EngineHandle::new(Box::pin(stream::iter(events)), cancel))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            let msg = args.get("message").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ToolResult::ok(msg))
        }
    }

    struct StrictTool;

    #[async_trait]
    impl Tool for StrictTool {
        fn name(&self) -> &str {
            "strict"
        }
        fn description(&self) -> &str {
            "requires a `value` field"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "required": ["value"]})
        }
        fn validate(&self, args: &Value) -> Option<ArgValidation> {
            if args.get("value").is_some() {
                Some(ArgValidation::ok())
            } else {
                Some(ArgValidation::invalid(vec!["missing `value`".to_string()]))
            }
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            Ok(ToolResult::ok("ran"))
        }
    }

    struct HeavyTool(AtomicUsize);

    #[async_trait]
    impl Tool for HeavyTool {
        fn name(&self) -> &str {
            "heavy"
        }
        fn description(&self) -> &str {
            "runs through the worker pool"
        }
        fn parameters_schema(&self) -> Value {
            json!({})
        }
        fn weight(&self) -> ToolWeight {
            ToolWeight::Heavyweight
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolResult, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::ok("heavy done"))
        }
    }

    fn policy() -> Arc<SecurityPolicy> {
        Arc::new(SecurityPolicy::new(AutonomyLevel::Full, None, vec![], 3600, 1000))
    }

    fn worker_pool() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(WorkerPoolConfig::default()))
    }

    async fn collect(loop_: Arc<AgentLoop>, message: Message) -> Vec<AgentEvent> {
        let mut stream = loop_.run(message);
        let mut out = Vec::new();
        while let Some(ev) = stream.next().await {
            let terminal = ev.is_terminal();
            out.push(ev);
            if terminal {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn plain_answer_with_no_tool_calls() {
        let engine = ScriptedEngine::new(vec![vec![
            EngineEvent::Started,
            EngineEvent::TextDelta { delta: "Hello".into() },
            EngineEvent::Completed { answer: "Hello".into(), usage: Usage::default() },
        ]]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let agent = Arc::new(AgentLoop::new(
            engine,
            Arc::new(tools),
            worker_pool(),
            policy(),
            AgentConfig::default(),
        ));
        let events = collect(agent, Message::user("hi")).await;
        assert!(matches!(events.last(), Some(AgentEvent::Complete { answer, .. }) if answer == "Hello"));
    }

    #[tokio::test]
    async fn single_tool_round_trip() {
        let engine = ScriptedEngine::new(vec![
            vec![
                EngineEvent::ToolStart { id: "1".into(), tool: "echo".into(), args: json!({"message": "ping"}) },
                EngineEvent::Completed { answer: String::new(), usage: Usage::default() },
            ],
            vec![EngineEvent::Completed { answer: "pong".into(), usage: Usage::default() }],
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let agent = Arc::new(AgentLoop::new(
            engine,
            Arc::new(tools),
            worker_pool(),
            policy(),
            AgentConfig::default(),
        ));
        let events = collect(agent, Message::user("use echo")).await;
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolEnd { tool, .. } if tool == "echo")));
        assert!(matches!(events.last(), Some(AgentEvent::Complete { answer, .. }) if answer == "pong"));
    }

    #[tokio::test]
    async fn invalid_tool_arguments_are_rejected() {
        let engine = ScriptedEngine::new(vec![
            vec![
                EngineEvent::ToolStart { id: "1".into(), tool: "strict".into(), args: json!({}) },
                EngineEvent::Completed { answer: String::new(), usage: Usage::default() },
            ],
            vec![EngineEvent::Completed { answer: "done".into(), usage: Usage::default() }],
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StrictTool));
        let agent = Arc::new(AgentLoop::new(
            engine,
            Arc::new(tools),
            worker_pool(),
            policy(),
            AgentConfig::default(),
        ));
        let events = collect(agent, Message::user("use strict")).await;
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolValidationError { .. })));
    }

    #[tokio::test]
    async fn unknown_tool_reports_validation_error() {
        let engine = ScriptedEngine::new(vec![
            vec![
                EngineEvent::ToolStart { id: "1".into(), tool: "missing".into(), args: json!({}) },
                EngineEvent::Completed { answer: String::new(), usage: Usage::default() },
            ],
            vec![EngineEvent::Completed { answer: "done".into(), usage: Usage::default() }],
        ]);
        let agent = Arc::new(AgentLoop::new(
            engine,
            Arc::new(ToolRegistry::new()),
            worker_pool(),
            policy(),
            AgentConfig::default(),
        ));
        let events = collect(agent, Message::user("use missing tool")).await;
        assert!(events.iter().any(
            |e| matches!(e, AgentEvent::ToolValidationError { errors, .. } if errors.iter().any(|s| s.contains("not found")))
        ));
    }

    #[tokio::test]
    async fn heavyweight_tool_runs_through_worker_pool() {
        let engine = ScriptedEngine::new(vec![
            vec![
                EngineEvent::ToolStart { id: "1".into(), tool: "heavy".into(), args: json!({}) },
                EngineEvent::Completed { answer: String::new(), usage: Usage::default() },
            ],
            vec![EngineEvent::Completed { answer: "done".into(), usage: Usage::default() }],
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(HeavyTool(AtomicUsize::new(0))));
        let pool = worker_pool();
        let agent = Arc::new(AgentLoop::new(engine, Arc::new(tools), pool.clone(), policy(), AgentConfig::default()));
        collect(agent, Message::user("use heavy")).await;
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn max_iterations_guard_trips() {
        let batches: Vec<Vec<EngineEvent>> = (0..5)
            .map(|_| {
                vec![
                    EngineEvent::ToolStart { id: "1".into(), tool: "echo".into(), args: json!({"message": "x"}) },
                    EngineEvent::Completed { answer: String::new(), usage: Usage::default() },
                ]
            })
            .collect();
        let engine = ScriptedEngine::new(batches);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let config = AgentConfig { max_iterations: 2, ..Default::default() };
        let agent = Arc::new(AgentLoop::new(engine, Arc::new(tools), worker_pool(), policy(), config));
        let events = collect(agent, Message::user("loop forever")).await;
        assert!(matches!(events.last(), Some(AgentEvent::Error { message }) if message.contains("maximum iterations")));
    }

    #[tokio::test]
    async fn steered_abort_stops_the_run() {
        let engine = ScriptedEngine::new(vec![vec![
            EngineEvent::TextDelta { delta: "partial".into() },
        ]]);
        let agent = Arc::new(AgentLoop::new(
            engine,
            Arc::new(ToolRegistry::new()),
            worker_pool(),
            policy(),
            AgentConfig::default(),
        ));
        agent.abort("user requested stop");
        let events = collect(agent, Message::user("hi")).await;
        assert!(matches!(events.last(), Some(AgentEvent::Aborted { reason }) if reason == "user requested stop"));
    }

    #[test]
    fn workspace_path_sanitisation_replaces_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            let path = format!("{}/projects/foo", home.to_string_lossy());
            assert_eq!(sanitize_workspace_path(&path), "./projects/foo");
        }
        assert_eq!(sanitize_workspace_path("/var/data"), "/var/data");
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(10), Duration::from_secs(30));
    }
}
