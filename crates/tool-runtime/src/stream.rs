use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ContentBlock;
use crate::provider::{GatewayError, ModelResponse};
use crate::tool::ToolCall;

/// Failure text for a response that ended with [`StopReason::Error`].
pub const ERROR_STOP: &str = "model reported an error stop";

/// Events emitted during streaming model responses.
/// Provider-agnostic; gateways translate vendor formats into these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of text from the assistant
    TextDelta {
        text: String,
    },
    /// A complete reasoning block (opaque to tools)
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    /// Reasoning the provider withheld; kept only as a placeholder
    RedactedThinking {
        data: String,
    },
    /// Start of a tool call (model wants to execute a tool)
    ToolCallStart {
        id: String,
        name: String,
    },
    /// Incremental JSON argument data for a tool call
    ToolCallDelta {
        id: String,
        arguments_delta: String,
    },
    /// Tool call arguments are complete
    ToolCallEnd {
        id: String,
    },
    /// The entire message is complete
    MessageEnd {
        stop_reason: StopReason,
    },
    /// An error occurred during streaming
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Normal end of response
    EndTurn,
    /// Model wants to use tools
    ToolUse,
    /// Hit max tokens limit
    MaxTokens,
    /// Stopped by stop sequence
    StopSequence,
    /// Provider reported a failure
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
            StopReason::Error => "error",
        }
    }
}

/// Folds a sequence of [`StreamEvent`]s into a [`ModelResponse`].
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    thinking: Vec<ContentBlock>,
    tool_calls: Vec<ToolCall>,
    current_tool: Option<(String, String, String)>,
    stop_reason: Option<StopReason>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StreamEvent) -> Result<(), GatewayError> {
        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(&text),
            StreamEvent::Thinking { thinking, signature } => {
                self.thinking.push(ContentBlock::Thinking { thinking, signature });
            }
            StreamEvent::RedactedThinking { data } => {
                self.thinking.push(ContentBlock::RedactedThinking { data });
            }
            StreamEvent::ToolCallStart { id, name } => {
                self.flush_tool();
                self.current_tool = Some((id, name, String::new()));
            }
            StreamEvent::ToolCallDelta { id, arguments_delta } => match &mut self.current_tool {
                Some((current_id, _, args)) if *current_id == id => args.push_str(&arguments_delta),
                _ => {
                    return Err(GatewayError::InvalidResponse(format!(
                        "argument delta for unknown tool call '{id}'"
                    )))
                }
            },
            StreamEvent::ToolCallEnd { .. } => self.flush_tool(),
            StreamEvent::MessageEnd { stop_reason } => {
                self.flush_tool();
                if stop_reason == StopReason::Error {
                    return Err(GatewayError::StreamError(ERROR_STOP.to_string()));
                }
                self.stop_reason = Some(stop_reason);
            }
            StreamEvent::Error { message } => return Err(GatewayError::StreamError(message)),
        }
        Ok(())
    }

    fn flush_tool(&mut self) {
        if let Some((id, name, args)) = self.current_tool.take() {
            self.tool_calls.push(ToolCall {
                id,
                name,
                input: parse_arguments(&args),
            });
        }
    }

    pub fn finish(mut self) -> ModelResponse {
        self.flush_tool();
        let stop_reason = self.stop_reason.unwrap_or(if self.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });
        ModelResponse {
            text: self.text,
            thinking: self.thinking,
            tool_calls: self.tool_calls,
            stop_reason,
            correlation_id: None,
        }
    }
}

/// Empty argument text means "no arguments"; unparsable text is kept raw so
/// schema validation reports it instead of silently dropping it.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_text_and_tool_calls() {
        let mut acc = ResponseAccumulator::new();
        for event in [
            StreamEvent::TextDelta { text: "Let me ".into() },
            StreamEvent::TextDelta { text: "look.".into() },
            StreamEvent::ToolCallStart { id: "c1".into(), name: "list_dir".into() },
            StreamEvent::ToolCallDelta { id: "c1".into(), arguments_delta: r#"{"path":"#.into() },
            StreamEvent::ToolCallDelta { id: "c1".into(), arguments_delta: r#""."}"#.into() },
            StreamEvent::ToolCallEnd { id: "c1".into() },
            StreamEvent::MessageEnd { stop_reason: StopReason::ToolUse },
        ] {
            acc.push(event).unwrap();
        }
        let response = acc.finish();
        assert_eq!(response.text, "Let me look.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].input["path"], ".");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamEvent::ToolCallStart { id: "c1".into(), name: "echo".into() })
            .unwrap();
        acc.push(StreamEvent::ToolCallEnd { id: "c1".into() }).unwrap();
        let response = acc.finish();
        assert!(response.tool_calls[0].input.as_object().unwrap().is_empty());
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_malformed_arguments_kept_raw() {
        assert_eq!(parse_arguments("{not json"), Value::String("{not json".into()));
    }

    #[test]
    fn test_error_event_fails_response() {
        let mut acc = ResponseAccumulator::new();
        let err = acc
            .push(StreamEvent::Error { message: "overloaded".into() })
            .unwrap_err();
        assert!(matches!(err, GatewayError::StreamError(m) if m == "overloaded"));
    }

    #[test]
    fn test_thinking_blocks_collected() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamEvent::Thinking { thinking: "hmm".into(), signature: None })
            .unwrap();
        acc.push(StreamEvent::RedactedThinking { data: "xx".into() }).unwrap();
        acc.push(StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn }).unwrap();
        let response = acc.finish();
        assert_eq!(response.thinking.len(), 2);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }
}
