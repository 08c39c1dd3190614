use crate::compaction::{CompactionPolicy, CompactionReport};
use crate::conversation::{Conversation, ConversationError};
use crate::message::{ContentBlock, Message};
use crate::provider::{GatewayError, ModelGateway, ModelOptions, ModelRequest, ModelResponse};
use crate::registry::ToolRegistry;
use crate::stream::{ResponseAccumulator, StopReason, StreamEvent, ERROR_STOP};
use crate::tool::{ToolCall, ToolContext, ToolResult, ToolStatus, CANCELLED};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::AgentConfig;

const SKIPPED_AFTER_DENIAL: &str = "skipped: permission denied for earlier tool call";
const SKIPPED_NOT_REQUESTED: &str = "skipped: response did not request tool use";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ProcessingToolCalls,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Hard cap on model round-trips per user turn
    pub max_rounds: usize,
    /// Send tool results back to the model; off records them only
    pub requery_after_tools: bool,
    pub streaming: bool,
    pub options: ModelOptions,
    pub compaction: CompactionPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_rounds: config.agent.max_rounds,
            requery_after_tools: config.agent.requery_after_tools,
            streaming: config.agent.streaming,
            options: ModelOptions::from(&config.agent),
            compaction: CompactionPolicy::from(&config.compaction),
        }
    }
}

/// Progress notifications for a UI or remote client.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Streamed text, not yet committed to the conversation
    TextDelta(String),
    Thinking(ContentBlock),
    StateChanged(LoopState),
    ToolStarted { call_id: String, tool_name: String },
    ToolFinished(ToolExecution),
    Compacted(CompactionReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

impl From<&ToolResult> for ToolExecution {
    fn from(result: &ToolResult) -> Self {
        Self {
            call_id: result.tool_call_id.clone(),
            tool_name: result.tool_name.clone(),
            status: result.status,
            error: result.error.clone(),
        }
    }
}

/// How a turn ended. Every variant leaves the loop `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model stopped requesting tools
    Completed,
    /// Tool results were appended but not sent back (re-query disabled)
    ToolResultsRecorded,
    PermissionDenied { tool: String },
    GatewayFailed { message: String },
    MaxRoundsExceeded { rounds: usize },
    Cancelled,
}

impl TurnOutcome {
    /// Whether the last model response arrived whole. Auto-compaction only
    /// runs after such turns.
    pub fn model_turn_completed(&self) -> bool {
        !matches!(self, TurnOutcome::GatewayFailed { .. } | TurnOutcome::Cancelled)
    }
}

/// Final structured result of one user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSummary {
    /// Committed assistant text across all rounds
    pub text: String,
    pub tool_executions: Vec<ToolExecution>,
    pub rounds: usize,
    pub outcome: TurnOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum AgenticLoopError {
    #[error("conversation corrupted: {0}")]
    CorruptedConversation(#[from] ConversationError),
}

enum ModelFailure {
    Cancelled,
    Gateway(GatewayError),
}

enum BatchOutcome {
    Done,
    Denied { tool: String },
    Cancelled,
}

/// The core agentic loop that orchestrates model ↔ tool execution.
///
/// Flow: User → Model → ToolCalls → Execute → Results → Model → ... → Final Text
///
/// One loop owns one conversation. Tool calls in a batch run strictly in the
/// order the model emitted them.
pub struct AgenticLoop {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    conversation: Conversation,
    context: ToolContext,
    config: LoopConfig,
    state: LoopState,
    events: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl AgenticLoop {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        conversation: Conversation,
        context: ToolContext,
    ) -> Self {
        Self {
            gateway,
            registry,
            conversation,
            context,
            config: LoopConfig::default(),
            state: LoopState::Idle,
            events: None,
        }
    }

    /// Build a loop for a fresh session from loaded configuration.
    pub fn from_config(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        system_prompt: &str,
        config: &AgentConfig,
    ) -> Self {
        Self::new(
            gateway,
            registry,
            Conversation::new(system_prompt),
            ToolContext::new(config.working_directory()),
        )
        .with_config(LoopConfig::from(config))
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// User-requested compaction, gated by the same threshold as auto mode.
    pub fn compact_now(&mut self) -> Option<CompactionReport> {
        let report = self.conversation.compact(&self.config.compaction);
        if let Some(report) = report {
            self.emit(TurnEvent::Compacted(report));
        }
        report
    }

    pub fn reset(&mut self) {
        info!("Conversation reset");
        self.conversation.reset();
        self.set_state(LoopState::Idle);
    }

    /// Run a single user turn through the agentic loop.
    ///
    /// Only a broken conversation invariant is an error; gateway failures,
    /// denials, cancellation and the round cap are reported as outcomes.
    pub async fn run_turn(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnSummary, AgenticLoopError> {
        self.verify_conversation()?;
        self.conversation.push(Message::user(input));

        let mut texts: Vec<String> = Vec::new();
        let mut executions: Vec<ToolExecution> = Vec::new();
        let mut rounds = 0;

        let outcome = loop {
            if rounds >= self.config.max_rounds {
                warn!(rounds, "Round cap reached, ending turn");
                break TurnOutcome::MaxRoundsExceeded { rounds };
            }
            rounds += 1;
            debug!(round = rounds, "Querying model");

            self.set_state(LoopState::AwaitingModel);
            let response = match self.query_model(cancel).await {
                Ok(response) => response,
                Err(ModelFailure::Cancelled) => {
                    info!(round = rounds, "Turn cancelled while awaiting model");
                    break TurnOutcome::Cancelled;
                }
                Err(ModelFailure::Gateway(e)) => {
                    warn!(gateway = self.gateway.name(), error = %e, "Model request failed");
                    let message = e.to_string();
                    self.conversation
                        .push(Message::assistant_error(format!("Model request failed: {message}")));
                    break TurnOutcome::GatewayFailed { message };
                }
            };

            if !response.text.is_empty() {
                texts.push(response.text.clone());
            }
            self.conversation.push(response.to_message());

            let calls = response.tool_calls;
            if calls.is_empty() {
                break TurnOutcome::Completed;
            }
            if response.stop_reason != StopReason::ToolUse {
                debug!(
                    stop_reason = response.stop_reason.as_str(),
                    count = calls.len(),
                    "Tool calls without tool-use stop, not executing"
                );
                self.skip_calls(&calls, ToolStatus::Skipped, SKIPPED_NOT_REQUESTED);
                break TurnOutcome::Completed;
            }

            self.set_state(LoopState::ProcessingToolCalls);
            info!(count = calls.len(), "Executing tool calls");
            match self.process_tool_calls(&calls, cancel, &mut executions).await {
                BatchOutcome::Done => {}
                BatchOutcome::Denied { tool } => break TurnOutcome::PermissionDenied { tool },
                BatchOutcome::Cancelled => break TurnOutcome::Cancelled,
            }

            if !self.config.requery_after_tools {
                break TurnOutcome::ToolResultsRecorded;
            }
        };

        self.set_state(LoopState::Idle);
        if outcome.model_turn_completed() {
            if let Some(report) = self.conversation.maybe_compact(&self.config.compaction) {
                info!(summarized = report.summarized, after = report.after, "Conversation compacted");
                self.emit(TurnEvent::Compacted(report));
            }
        }
        self.verify_conversation()?;

        info!(rounds, tools = executions.len(), ?outcome, "Turn finished");
        Ok(TurnSummary {
            text: texts.join("\n"),
            tool_executions: executions,
            rounds,
            outcome,
        })
    }

    async fn query_model(&self, cancel: &CancellationToken) -> Result<ModelResponse, ModelFailure> {
        let request = ModelRequest {
            messages: self.conversation.messages().to_vec(),
            tools: self.registry.schema(),
            options: self.config.options,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModelFailure::Cancelled),
            result = self.fetch_response(request) => result.map_err(ModelFailure::Gateway),
        }
    }

    /// Text and thinking are surfaced as they arrive; nothing is committed
    /// until the whole response is in.
    async fn fetch_response(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let response = if self.config.streaming {
            self.stream_response(request).await?
        } else {
            let response = self.gateway.send(request).await?;
            for block in &response.thinking {
                self.emit(TurnEvent::Thinking(block.clone()));
            }
            if !response.text.is_empty() {
                self.emit(TurnEvent::TextDelta(response.text.clone()));
            }
            response
        };
        // Gateways answering through `send` bypass the accumulator's check
        if response.stop_reason == StopReason::Error {
            return Err(GatewayError::StreamError(ERROR_STOP.to_string()));
        }
        Ok(response)
    }

    async fn stream_response(&self, request: ModelRequest) -> Result<ModelResponse, GatewayError> {
        let mut stream = self.gateway.stream(request).await?;
        let mut acc = ResponseAccumulator::new();
        while let Some(event) = stream.next().await {
            let event = event?;
            self.surface(&event);
            acc.push(event)?;
        }
        Ok(acc.finish())
    }

    fn surface(&self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.emit(TurnEvent::TextDelta(text.clone())),
            StreamEvent::Thinking { thinking, signature } => {
                self.emit(TurnEvent::Thinking(ContentBlock::Thinking {
                    thinking: thinking.clone(),
                    signature: signature.clone(),
                }))
            }
            StreamEvent::RedactedThinking { data } => {
                self.emit(TurnEvent::Thinking(ContentBlock::RedactedThinking { data: data.clone() }))
            }
            _ => {}
        }
    }

    async fn process_tool_calls(
        &mut self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
        executions: &mut Vec<ToolExecution>,
    ) -> BatchOutcome {
        for (index, call) in calls.iter().enumerate() {
            if cancel.is_cancelled() {
                self.skip_calls(&calls[index..], ToolStatus::Cancelled, CANCELLED);
                return BatchOutcome::Cancelled;
            }

            self.emit(TurnEvent::ToolStarted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
            });
            let result = self.registry.invoke(call, &self.context, cancel).await;
            self.conversation.push(Message::tool_result(&result));

            let execution = ToolExecution::from(&result);
            self.emit(TurnEvent::ToolFinished(execution.clone()));
            executions.push(execution);

            let rest = &calls[index + 1..];
            match result.status {
                ToolStatus::PermissionDenied => {
                    info!(tool = %call.name, skipped = rest.len(), "Permission denied, interrupting batch");
                    self.skip_calls(rest, ToolStatus::Skipped, SKIPPED_AFTER_DENIAL);
                    return BatchOutcome::Denied {
                        tool: call.name.clone(),
                    };
                }
                ToolStatus::Cancelled => {
                    self.skip_calls(rest, ToolStatus::Cancelled, CANCELLED);
                    return BatchOutcome::Cancelled;
                }
                _ => {}
            }
        }
        BatchOutcome::Done
    }

    /// Answer calls that will not run so every tool-use block has a result.
    fn skip_calls(&mut self, calls: &[ToolCall], status: ToolStatus, reason: &str) {
        for call in calls {
            self.conversation
                .push(Message::tool_result(&ToolResult::failure(call, status, reason)));
        }
    }

    fn verify_conversation(&self) -> Result<(), AgenticLoopError> {
        self.conversation.verify().map_err(|e| {
            error!(error = %e, "Conversation invariant broken");
            AgenticLoopError::from(e)
        })
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Loop state change");
            self.state = state;
            self.emit(TurnEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BlockingGateway, CompletionModel};
    use crate::message::Role;
    use crate::permission::{PermissionLedger, PermissionType};
    use crate::provider::mock::MockGateway;
    use crate::schema::{ParameterSpec, ParameterType, ToolParams};
    use crate::tool::{EchoTool, Tool, ToolDefinition, ToolError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Shell-gated tool that counts executions.
    struct CountingShell {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingShell {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "counting_shell".into(),
                description: "Runs a command".into(),
                parameters: vec![ParameterSpec::required("command", ParameterType::String, "")],
                permission: Some(PermissionType::Shell),
            }
        }

        fn permission_scope(&self, params: &ToolParams, _ctx: &ToolContext) -> Option<String> {
            params.str("command").map(str::to_string)
        }

        async fn execute(&self, _params: ToolParams, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!("ok"))
        }
    }

    struct Fixture {
        agent: AgenticLoop,
        gateway: Arc<MockGateway>,
        ledger: Arc<PermissionLedger>,
        runs: Arc<AtomicUsize>,
    }

    fn fixture(config: LoopConfig) -> Fixture {
        let gateway = Arc::new(MockGateway::new());
        let ledger = Arc::new(PermissionLedger::new());
        let registry = Arc::new(ToolRegistry::new(ledger.clone()));
        let runs = Arc::new(AtomicUsize::new(0));
        registry.register(EchoTool).unwrap();
        registry.register(CountingShell { runs: runs.clone() }).unwrap();

        let agent = AgenticLoop::new(
            gateway.clone(),
            registry,
            Conversation::new("You are a test agent."),
            ToolContext::new("/tmp"),
        )
        .with_config(config);
        Fixture {
            agent,
            gateway,
            ledger,
            runs,
        }
    }

    fn call(id: &str, name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let mut f = fixture(LoopConfig::default());
        f.gateway.queue_text("Hello, I'm an assistant!");

        let summary = f.agent.run_turn("Hello", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::Completed);
        assert_eq!(summary.text, "Hello, I'm an assistant!");
        assert_eq!(summary.rounds, 1);
        assert_eq!(f.agent.conversation().len(), 3);
        assert_eq!(f.agent.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_tool_call_then_requery() {
        let mut f = fixture(LoopConfig::default());
        f.gateway
            .queue_tool_calls(vec![call("call_1", "echo", json!({"message": "test"}))]);
        f.gateway.queue_text("Done!");

        let summary = f.agent.run_turn("Echo test", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::Completed);
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.tool_executions.len(), 1);
        assert!(summary.tool_executions[0].success());
        assert_eq!(f.gateway.request_count(), 2);

        // system, user, assistant (tool call), tool result, assistant (text)
        let messages = f.agent.conversation().messages();
        assert_eq!(messages.len(), 5);
        assert!(messages[3].is_tool_result());
        assert_eq!(messages[4].text(), "Done!");

        // The re-query carries the result
        let second = &f.gateway.requests()[1];
        assert!(second.messages.iter().any(Message::is_tool_result));
    }

    #[tokio::test]
    async fn test_denial_interrupts_batch() {
        let mut f = fixture(LoopConfig::default());
        f.ledger.grant("counting_shell", PermissionType::Shell, Some("ls"));
        f.gateway.queue_tool_calls(vec![
            call("t1", "echo", json!({"message": "one"})),
            call("t2", "counting_shell", json!({"command": "rm"})),
            call("t3", "counting_shell", json!({"command": "ls"})),
        ]);
        f.gateway.queue_text("should never be requested");

        let summary = f.agent.run_turn("clean up", &CancellationToken::new()).await.unwrap();

        assert_eq!(
            summary.outcome,
            TurnOutcome::PermissionDenied {
                tool: "counting_shell".into()
            }
        );
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
        assert_eq!(f.gateway.request_count(), 1);
        assert_eq!(summary.tool_executions.len(), 2);
        assert_eq!(summary.tool_executions[1].error.as_deref(), Some("permission denied"));

        // Every tool-use block still has a result; t3 was answered, not run
        let messages = f.agent.conversation().messages();
        let last = messages.last().unwrap();
        match &last.blocks()[0] {
            ContentBlock::ToolResult { tool_use_id, is_error, content } => {
                assert_eq!(tool_use_id, "t3");
                assert!(is_error);
                assert_eq!(content, SKIPPED_AFTER_DENIAL);
            }
            other => panic!("unexpected block: {other:?}"),
        }
        assert_eq!(f.agent.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let mut f = fixture(LoopConfig::default());
        f.gateway.queue_tool_calls(vec![
            call("c1", "teleport", json!({})),
            call("c2", "echo", json!({"message": "still here"})),
        ]);
        f.gateway.queue_text("Sorry, no teleport.");

        let summary = f.agent.run_turn("go", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::Completed);
        assert_eq!(summary.tool_executions[0].status, ToolStatus::NotFound);
        assert!(summary.tool_executions[1].success());
        assert_eq!(f.gateway.request_count(), 2);
    }

    #[tokio::test]
    async fn test_gateway_failure_appends_error_message() {
        let mut f = fixture(LoopConfig::default());
        f.gateway.queue_error("connection reset");

        let summary = f.agent.run_turn("hi", &CancellationToken::new()).await.unwrap();

        assert!(matches!(summary.outcome, TurnOutcome::GatewayFailed { .. }));
        let last = f.agent.conversation().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.text().contains("connection reset"));
        assert_eq!(f.agent.state(), LoopState::Idle);
    }

    struct ErrorStopModel;

    #[async_trait]
    impl CompletionModel for ErrorStopModel {
        async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, GatewayError> {
            Ok(ModelResponse {
                stop_reason: StopReason::Error,
                ..ModelResponse::text("partial")
            })
        }
    }

    #[tokio::test]
    async fn test_error_stop_fails_turn_in_both_modes() {
        for streaming in [false, true] {
            let gateway = Arc::new(BlockingGateway::new(Box::new(ErrorStopModel), "error-stop"));
            let registry = Arc::new(ToolRegistry::new(Arc::new(PermissionLedger::new())));
            let mut agent = AgenticLoop::new(
                gateway,
                registry,
                Conversation::new("You are a test agent."),
                ToolContext::new("/tmp"),
            )
            .with_config(LoopConfig {
                streaming,
                ..LoopConfig::default()
            });

            let summary = agent.run_turn("hi", &CancellationToken::new()).await.unwrap();

            match &summary.outcome {
                TurnOutcome::GatewayFailed { message } => assert!(message.contains(ERROR_STOP)),
                other => panic!("streaming={streaming}: unexpected outcome {other:?}"),
            }
            let last = agent.conversation().last().unwrap();
            assert_eq!(last.role, Role::Assistant);
            assert_eq!(last.kind(), Some("error"));
            assert_eq!(agent.state(), LoopState::Idle);
        }
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_compacted() {
        let config = LoopConfig {
            compaction: CompactionPolicy {
                threshold: 2,
                keep_recent: 1,
                summary_chars: 100,
                auto: true,
            },
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        f.gateway.queue_error("connection reset");

        f.agent.run_turn("hi", &CancellationToken::new()).await.unwrap();

        let messages = f.agent.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert!(!messages.iter().any(|m| m.is_summary()));
        assert_eq!(messages[2].kind(), Some("error"));
    }

    #[tokio::test]
    async fn test_round_cap() {
        let config = LoopConfig {
            max_rounds: 2,
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        for i in 0..3 {
            f.gateway
                .queue_tool_calls(vec![call(&format!("c{i}"), "echo", json!({"message": "again"}))]);
        }

        let summary = f.agent.run_turn("loop forever", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::MaxRoundsExceeded { rounds: 2 });
        assert_eq!(f.gateway.request_count(), 2);
        assert_eq!(summary.tool_executions.len(), 2);
    }

    #[tokio::test]
    async fn test_requery_disabled_records_results() {
        let config = LoopConfig {
            requery_after_tools: false,
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        f.gateway
            .queue_tool_calls(vec![call("c1", "echo", json!({"message": "x"}))]);

        let summary = f.agent.run_turn("echo", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::ToolResultsRecorded);
        assert_eq!(f.gateway.request_count(), 1);
        assert!(f.agent.conversation().last().unwrap().is_tool_result());
    }

    #[tokio::test]
    async fn test_calls_without_tool_use_stop_are_not_run() {
        let mut f = fixture(LoopConfig::default());
        f.ledger.grant("counting_shell", PermissionType::Shell, None);
        let mut response = ModelResponse::tool_calls(vec![call("c1", "counting_shell", json!({"command": "ls"}))]);
        response.stop_reason = StopReason::MaxTokens;
        f.gateway.queue_response(response.into_events());

        let summary = f.agent.run_turn("hi", &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::Completed);
        assert!(summary.tool_executions.is_empty());
        assert_eq!(f.runs.load(Ordering::SeqCst), 0);
        assert!(f.agent.conversation().last().unwrap().is_tool_result());
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_model() {
        let mut f = fixture(LoopConfig::default());
        f.gateway.queue_hang();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = f.agent.run_turn("hi", &cancel).await.unwrap();

        assert_eq!(summary.outcome, TurnOutcome::Cancelled);
        // Nothing partial is committed: system + user only
        assert_eq!(f.agent.conversation().len(), 2);
        assert_eq!(f.agent.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn test_events_are_surfaced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut f = fixture(LoopConfig::default());
        f.agent = f.agent.with_event_sink(tx);
        f.gateway
            .queue_tool_calls(vec![call("c1", "echo", json!({"message": "x"}))]);
        f.gateway.queue_text("Hello");

        f.agent.run_turn("hi", &CancellationToken::new()).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::TextDelta(t) if t == "Hello")));
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::ToolStarted { tool_name, .. } if tool_name == "echo")));
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::StateChanged(LoopState::ProcessingToolCalls))));
        assert!(matches!(
            events.last(),
            Some(TurnEvent::StateChanged(LoopState::Idle))
        ));
    }

    #[tokio::test]
    async fn test_blocking_mode_still_surfaces_text() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = LoopConfig {
            streaming: false,
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        f.agent = f.agent.with_event_sink(tx);
        f.gateway.queue_text("whole answer");

        let summary = f.agent.run_turn("hi", &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.text, "whole answer");
        let mut saw_text = false;
        while let Ok(event) = rx.try_recv() {
            saw_text |= matches!(event, TurnEvent::TextDelta(ref t) if t == "whole answer");
        }
        assert!(saw_text);
    }

    #[tokio::test]
    async fn test_auto_compaction_after_turn() {
        let config = LoopConfig {
            compaction: CompactionPolicy {
                threshold: 4,
                keep_recent: 2,
                summary_chars: 100,
                auto: true,
            },
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        f.gateway
            .queue_tool_calls(vec![call("c1", "echo", json!({"message": "x"}))]);
        f.gateway.queue_text("first done");
        f.gateway.queue_text("second done");

        f.agent.run_turn("one", &CancellationToken::new()).await.unwrap();
        // Only the user message is folded: the kept tail is widened back to
        // the assistant message that issued the call
        let messages = f.agent.conversation().messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].is_summary());
        assert!(messages[3].is_tool_result());
        assert_eq!(messages[4].text(), "first done");

        f.agent.run_turn("two", &CancellationToken::new()).await.unwrap();
        let messages = f.agent.conversation().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3].text(), "second done");
    }

    #[tokio::test]
    async fn test_reset_and_manual_compact() {
        let config = LoopConfig {
            compaction: CompactionPolicy {
                threshold: 3,
                keep_recent: 1,
                summary_chars: 100,
                auto: false,
            },
            ..LoopConfig::default()
        };
        let mut f = fixture(config);
        f.gateway.queue_text("a");
        f.gateway.queue_text("b");
        f.agent.run_turn("one", &CancellationToken::new()).await.unwrap();
        f.agent.run_turn("two", &CancellationToken::new()).await.unwrap();
        assert_eq!(f.agent.conversation().len(), 5);

        let report = f.agent.compact_now().unwrap();
        assert_eq!(report.summarized, 3);
        assert!(f.agent.compact_now().is_none());

        f.agent.reset();
        assert_eq!(f.agent.conversation().len(), 1);
    }

    #[test]
    fn test_config_from_agent_config() {
        let mut agent_config = AgentConfig::default();
        agent_config.agent.max_rounds = 3;
        agent_config.compaction.base_window = 6;
        let config = LoopConfig::from(&agent_config);
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.compaction.threshold, 12);
        assert_eq!(config.options.max_tokens, 4096);
    }

    #[test]
    fn test_from_config_uses_configured_directory() {
        let mut agent_config = AgentConfig::default();
        agent_config.agent.max_rounds = 7;
        agent_config.agent.streaming = false;
        agent_config.agent.working_directory = Some("/srv/work".into());
        let registry = Arc::new(ToolRegistry::new(Arc::new(PermissionLedger::new())));

        let agent = AgenticLoop::from_config(
            Arc::new(MockGateway::new()),
            registry,
            "You are a configured agent.",
            &agent_config,
        );

        assert_eq!(agent.config().max_rounds, 7);
        assert!(!agent.config().streaming);
        assert_eq!(agent.context.working_directory, std::path::PathBuf::from("/srv/work"));
        assert_eq!(agent.conversation().len(), 1);
        assert_eq!(agent.conversation().messages()[0].role, Role::System);
        assert_eq!(agent.state(), LoopState::Idle);
    }
}
