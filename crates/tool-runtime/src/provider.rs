use crate::message::{ContentBlock, Message};
use crate::stream::{ResponseAccumulator, StopReason, StreamEvent};
use crate::tool::{ToolCall, ToolDescriptor};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use warden_core::AgentSettings;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

impl From<&AgentSettings> for ModelOptions {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Everything the model sees for one round: the full conversation and the
/// tool schema as of this call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    pub options: ModelOptions,
}

/// Terminal structure of one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    /// Thinking and redacted-thinking blocks, in arrival order
    pub thinking: Vec<ContentBlock>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub correlation_id: Option<String>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thinking: Vec::new(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            correlation_id: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
            ..Self::text("")
        }
    }

    /// Content blocks for the committed assistant message: reasoning first,
    /// then text, then one tool-use block per call.
    pub fn content_blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = self.thinking.clone();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        blocks.extend(self.tool_calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));
        blocks
    }

    pub fn to_message(&self) -> Message {
        let message = Message::assistant(self.content_blocks(), self.stop_reason);
        match &self.correlation_id {
            Some(id) => message.with_metadata("correlation_id", Value::String(id.clone())),
            None => message,
        }
    }

    /// Replay as stream events, for gateways that only produce whole responses.
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for block in self.thinking {
            match block {
                ContentBlock::Thinking { thinking, signature } => {
                    events.push(StreamEvent::Thinking { thinking, signature })
                }
                ContentBlock::RedactedThinking { data } => {
                    events.push(StreamEvent::RedactedThinking { data })
                }
                _ => {}
            }
        }
        if !self.text.is_empty() {
            events.push(StreamEvent::TextDelta { text: self.text });
        }
        for call in self.tool_calls {
            events.push(StreamEvent::ToolCallStart {
                id: call.id.clone(),
                name: call.name,
            });
            events.push(StreamEvent::ToolCallDelta {
                id: call.id.clone(),
                arguments_delta: call.input.to_string(),
            });
            events.push(StreamEvent::ToolCallEnd { id: call.id });
        }
        events.push(StreamEvent::MessageEnd {
            stop_reason: self.stop_reason,
        });
        events
    }
}

/// The loop's view of a model provider.
///
/// Defined here, by the consumer; provider crates implement it. Gateways own
/// their timeout and retry policy and must always resolve.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Stream a response with the request's tools available.
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, GatewayError>;

    /// Non-streaming convenience: folds the stream into one response.
    async fn send(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let mut stream = self.stream(request).await?;
        let mut acc = ResponseAccumulator::new();
        while let Some(event) = stream.next().await {
            acc.push(event?)?;
        }
        Ok(acc.finish())
    }

    /// Gateway name for logging/debugging (e.g., "claude", "openai", "ollama")
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("Authentication failed")]
    AuthError,
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Scripted gateway for testing the agentic loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    enum Scripted {
        Events(Vec<StreamEvent>),
        Fail(String),
        Hang,
    }

    /// Replays queued responses in FIFO order and records every request.
    /// An exhausted script answers with an empty end-of-turn.
    #[derive(Default)]
    pub struct MockGateway {
        script: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        fn script(&self) -> MutexGuard<'_, VecDeque<Scripted>> {
            self.script.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn recorded(&self) -> MutexGuard<'_, Vec<ModelRequest>> {
            self.requests.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Queue a response that will be returned on the next call.
        pub fn queue_response(&self, events: Vec<StreamEvent>) {
            self.script().push_back(Scripted::Events(events));
        }

        /// Queue a simple text response.
        pub fn queue_text(&self, text: &str) {
            self.queue_response(ModelResponse::text(text).into_events());
        }

        /// Queue a tool-use response requesting `calls` in order.
        pub fn queue_tool_calls(&self, calls: Vec<ToolCall>) {
            self.queue_response(ModelResponse::tool_calls(calls).into_events());
        }

        /// Queue a network failure.
        pub fn queue_error(&self, message: &str) {
            self.script().push_back(Scripted::Fail(message.to_string()));
        }

        /// Queue a response that never arrives.
        pub fn queue_hang(&self) {
            self.script().push_back(Scripted::Hang);
        }

        pub fn requests(&self) -> Vec<ModelRequest> {
            self.recorded().clone()
        }

        pub fn request_count(&self) -> usize {
            self.recorded().len()
        }
    }

    #[async_trait]
    impl ModelGateway for MockGateway {
        async fn stream(&self, request: ModelRequest) -> Result<EventStream, GatewayError> {
            self.recorded().push(request);
            let next = self.script().pop_front();
            match next {
                Some(Scripted::Events(events)) => Ok(Box::pin(stream::iter(events.into_iter().map(Ok)))),
                Some(Scripted::Fail(message)) => Err(GatewayError::NetworkError(message)),
                Some(Scripted::Hang) => Ok(Box::pin(stream::pending::<Result<StreamEvent, GatewayError>>())),
                None => Ok(Box::pin(stream::iter(vec![Ok(StreamEvent::MessageEnd {
                    stop_reason: StopReason::EndTurn,
                })]))),
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
