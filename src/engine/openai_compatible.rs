//! An [`Engine`] that talks to any OpenAI-compatible chat-completions API:
//! OpenAI itself, Anthropic/Gemini/OpenRouter/Vercel AI Gateway via their
//! OpenAI-compatible endpoints, or a local Ollama.
//!
//! Grounded on the teacher's `ai::providers::openai_compatible`: the request
//! builder, provider presets, and retry loop are carried over almost
//! unchanged. What's new is tool-call support (the teacher's provider never
//! needed it) and collapsing `complete`/`stream` into a single event stream
//! driven by [`Engine::start_run`].

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::{Engine, EngineHandle, Job, ToolSpec};
use crate::errors::EngineError;
use crate::types::{CancelToken, EngineEvent, Message, MessageRole, Usage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ApiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<u32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<ApiFunctionCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ApiToolDef {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

/// Configuration for an OpenAI-compatible engine endpoint.
#[derive(Debug, Clone)]
pub struct OpenAICompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub extra_headers: HashMap<String, String>,
}

impl Default for OpenAICompatibleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            default_model: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: MAX_RETRIES,
            extra_headers: HashMap::new(),
        }
    }
}

impl OpenAICompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_model(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: model.into(),
            ..Default::default()
        }
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://api.openai.com/v1", "gpt-4.1")
    }

    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, "https://api.anthropic.com/v1", "claude-sonnet-4.5")
            .with_header("anthropic-version", "2023-06-01")
    }

    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::with_model(
            api_key,
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "gemini-2.5-flash",
        )
    }

    pub fn ollama() -> Self {
        Self::with_model("", "http://127.0.0.1:11434/v1", "llama3")
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::with_model(
            api_key,
            "https://openrouter.ai/api/v1",
            "anthropic/claude-sonnet-4.5",
        )
    }

    pub fn vercel_gateway(api_key: impl Into<String>) -> Self {
        Self::with_model(
            api_key,
            "https://ai-gateway.vercel.sh/v1",
            "google/gemini-3-flash",
        )
    }
}

/// Generic engine speaking the OpenAI chat-completions wire protocol.
pub struct OpenAICompatibleEngine {
    client: Client,
    config: OpenAICompatibleConfig,
    id: String,
}

impl OpenAICompatibleEngine {
    pub fn new(config: OpenAICompatibleConfig, id: impl Into<String>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::fatal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            config,
            id: id.into(),
        })
    }

    fn convert_message(msg: &Message) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: Some(tc.id.clone()),
                        index: None,
                        kind: Some("function".to_string()),
                        function: Some(ApiFunctionCall {
                            name: Some(tc.name.clone()),
                            arguments: Some(tc.args.to_string()),
                        }),
                    })
                    .collect(),
            )
        };
        ApiMessage {
            role: role.to_string(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn build_request(&self, job: &Job) -> ChatCompletionRequest {
        let tools = if job.tools.is_empty() {
            None
        } else {
            Some(
                job.tools
                    .iter()
                    .map(|t: &ToolSpec| ApiToolDef {
                        kind: "function",
                        function: ApiFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };
        ChatCompletionRequest {
            model: job.model.clone(),
            messages: job.messages.iter().map(Self::convert_message).collect(),
            temperature: job.temperature,
            max_tokens: job.max_tokens,
            tools,
            tool_choice: if job.tools.is_empty() { None } else { Some("auto") },
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
        }
    }

    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    async fn send_with_retry(&self, body: &ChatCompletionRequest) -> Result<Response, EngineError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2_u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let mut builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(auth) = self.auth_header() {
                builder = builder.header("Authorization", auth);
            }
            for (key, value) in &self.config.extra_headers {
                builder = builder.header(key, value);
            }

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_client_error() && resp.status() != StatusCode::TOO_MANY_REQUESTS => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    return Err(EngineError::fatal(format!(
                        "request failed with status {status}: {text}"
                    )));
                }
                Ok(resp) => last_error = Some(format!("request failed with status {}", resp.status())),
                Err(e) => last_error = Some(format!("http request failed: {e}")),
            }
        }

        Err(EngineError::fatal(
            last_error.unwrap_or_else(|| "request failed".to_string()),
        ))
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[async_trait]
impl Engine for OpenAICompatibleEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn context_limit(&self) -> usize {
        128_000
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn start_run(&self, job: Job, cancel: CancelToken) -> Result<EngineHandle, EngineError> {
        let request = self.build_request(&job);
        let response = self.send_with_retry(&request).await?;
        let event_stream = response.bytes_stream().eventsource();

        struct State {
            src: std::pin::Pin<Box<dyn futures::Stream<Item = Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>,
            calls: HashMap<u32, PendingToolCall>,
            answer: String,
            usage: Usage,
            pending: VecDeque<EngineEvent>,
            finished: bool,
            cancel: CancelToken,
        }

        let mut initial_pending = VecDeque::new();
        initial_pending.push_back(EngineEvent::Started);

        let handle_cancel = cancel.clone();
        let state = State {
            src: Box::pin(event_stream),
            calls: HashMap::new(),
            answer: String::new(),
            usage: Usage::default(),
            pending: initial_pending,
            finished: false,
            cancel,
        };

        let mapped = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(ev) = state.pending.pop_front() {
                    return Some((ev, state));
                }
                if state.finished || state.cancel.is_cancelled() {
                    return None;
                }

                match state.src.next().await {
                    None => {
                        state.finished = true;
                        state.pending.push_back(EngineEvent::Completed {
                            answer: state.answer.clone(),
                            usage: state.usage,
                        });
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        state.pending.push_back(EngineEvent::Error {
                            message: format!("stream error: {e}"),
                            retryable: true,
                        });
                    }
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            flush_tool_calls(&mut state.calls, &mut state.pending);
                            state.finished = true;
                            state.pending.push_back(EngineEvent::Completed {
                                answer: state.answer.clone(),
                                usage: state.usage,
                            });
                            continue;
                        }
                        match serde_json::from_str::<ApiStreamResponse>(&event.data) {
                            Err(e) => {
                                state.finished = true;
                                state.pending.push_back(EngineEvent::Error {
                                    message: format!("failed to parse stream chunk: {e}"),
                                    retryable: false,
                                });
                            }
                            Ok(resp) => {
                                if let Some(u) = resp.usage {
                                    state.usage = Usage {
                                        prompt_tokens: u.prompt_tokens,
                                        completion_tokens: u.completion_tokens,
                                        total_tokens: u.total_tokens,
                                    };
                                }
                                if let Some(choice) = resp.choices.first() {
                                    if let Some(deltas) = &choice.delta.tool_calls {
                                        for d in deltas {
                                            let idx = d.index.unwrap_or(0);
                                            let entry = state.calls.entry(idx).or_default();
                                            if let Some(id) = &d.id {
                                                entry.id = Some(id.clone());
                                            }
                                            if let Some(f) = &d.function {
                                                if let Some(name) = &f.name {
                                                    entry.name = Some(name.clone());
                                                }
                                                if let Some(args) = &f.arguments {
                                                    entry.arguments.push_str(args);
                                                }
                                            }
                                        }
                                    }
                                    if let Some(content) = &choice.delta.content {
                                        if !content.is_empty() {
                                            state.answer.push_str(content);
                                            state.pending.push_back(EngineEvent::TextDelta {
                                                delta: content.clone(),
                                            });
                                        }
                                    }
                                    if choice.finish_reason.is_some() {
                                        flush_tool_calls(&mut state.calls, &mut state.pending);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(EngineHandle::new(Box::pin(mapped), handle_cancel))
    }
}

fn flush_tool_calls(calls: &mut HashMap<u32, PendingToolCall>, pending: &mut VecDeque<EngineEvent>) {
    let mut indices: Vec<u32> = calls.keys().copied().collect();
    indices.sort_unstable();
    for idx in indices {
        if let Some(call) = calls.remove(&idx) {
            let args = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
            pending.push_back(EngineEvent::ToolStart {
                id: call.id.unwrap_or_default(),
                tool: call.name.unwrap_or_default(),
                args,
            });
        }
    }
}
