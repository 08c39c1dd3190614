//! Role-tagged conversation messages and their content blocks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stream::StopReason;
use crate::tool::ToolResult;

/// Metadata key describing what produced a message.
pub const META_KIND: &str = "kind";
pub const KIND_TOOL_RESULT: &str = "tool_result";
pub const KIND_SUMMARY: &str = "summary";
pub const KIND_ERROR: &str = "error";
pub const META_TOOL_NAME: &str = "tool_name";
pub const META_STOP_REASON: &str = "stop_reason";
pub const META_THINKING: &str = "thinking";
pub const META_SUMMARIZED_COUNT: &str = "summarized_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Typed content inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Model-internal reasoning; never passed to tools.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn is_thinking(&self) -> bool {
        matches!(
            self,
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation history.
///
/// Content is fixed once the message is appended; only `metadata` is
/// touched afterwards (compaction bookkeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            metadata: Map::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(blocks: Vec<ContentBlock>, stop_reason: StopReason) -> Self {
        Self::new(Role::Assistant, MessageContent::Blocks(blocks))
            .with_metadata(META_STOP_REASON, Value::String(stop_reason.as_str().to_string()))
    }

    /// Assistant-role message reporting a gateway failure in-line.
    pub fn assistant_error(message: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(message.into()))
            .with_metadata(META_KIND, Value::String(KIND_ERROR.to_string()))
    }

    /// Tool results travel as user-role messages tagged so that compaction
    /// and logging can tell them apart from genuine user text.
    pub fn tool_result(result: &ToolResult) -> Self {
        let content = if result.success() {
            result.output.clone().unwrap_or(Value::Null)
        } else {
            Value::String(result.error.clone().unwrap_or_default())
        };
        Self::new(
            Role::User,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: result.tool_call_id.clone(),
                content,
                is_error: !result.success(),
            }]),
        )
        .with_metadata(META_KIND, Value::String(KIND_TOOL_RESULT.to_string()))
        .with_metadata(META_TOOL_NAME, Value::String(result.tool_name.clone()))
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(META_KIND).and_then(Value::as_str)
    }

    pub fn is_tool_result(&self) -> bool {
        self.kind() == Some(KIND_TOOL_RESULT)
    }

    pub fn is_summary(&self) -> bool {
        self.kind() == Some(KIND_SUMMARY)
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Concatenated plain text, ignoring thinking and tool blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn thinking_blocks(&self) -> impl Iterator<Item = &ContentBlock> {
        self.blocks().iter().filter(|b| b.is_thinking())
    }

    /// Rough character count used for the token estimate.
    pub fn char_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(text) => text.len(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.len(),
                    ContentBlock::Thinking { thinking, .. } => thinking.len(),
                    ContentBlock::RedactedThinking { data } => data.len(),
                    ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                    ContentBlock::ToolResult { content, .. } => match content {
                        Value::String(s) => s.len(),
                        other => other.to_string().len(),
                    },
                })
                .sum(),
        }
    }
}
