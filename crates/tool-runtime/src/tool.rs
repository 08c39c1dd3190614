use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::permission::PermissionType;
use crate::schema::{to_json_schema, ParameterSpec, ParameterType, ToolParams};

/// Error text for a call whose permission was refused.
pub const PERMISSION_DENIED: &str = "permission denied";
/// Error text for a call naming an unregistered tool.
pub const NOT_FOUND: &str = "not found";
/// Error text for a call interrupted by a user abort.
pub const CANCELLED: &str = "cancelled";

/// Describes a tool: its identity, parameters, and permission requirement.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "bash", "file_read")
    pub name: String,
    /// Human-readable description for the model
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    /// Permission type checked before every invocation; `None` runs ungated
    pub permission: Option<PermissionType>,
}

impl ToolDefinition {
    pub fn requires_permission(&self) -> bool {
        self.permission.is_some()
    }

    pub fn input_schema(&self) -> Value {
        to_json_schema(&self.parameters)
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// The model-facing view of a tool.
/// Maps to Claude's tool format and OpenAI's function format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Represents a model requesting execution of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id for this invocation (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments, validated by the registry before dispatch
    pub input: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    /// The action ran and returned an error
    Failed,
    InvalidInput,
    NotFound,
    PermissionDenied,
    /// Not run: an earlier call in the batch ended it
    Skipped,
    Cancelled,
}

/// Result of executing a tool, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, status: ToolStatus, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    pub fn is_permission_denied(&self) -> bool {
        self.status == ToolStatus::PermissionDenied
    }
}

/// Context passed to tool execution.
///
/// Logging goes through the `tool` span the registry opens around each call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Working directory for file/shell operations
    pub working_directory: PathBuf,
}

impl ToolContext {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
        }
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, parameters, permission).
    fn definition(&self) -> ToolDefinition;

    /// Scope the permission check applies to, e.g. the path being written.
    /// `None` asks for the tool's global grant.
    fn permission_scope(&self, _params: &ToolParams, _context: &ToolContext) -> Option<String> {
        None
    }

    /// Execute the tool with validated input.
    async fn execute(&self, params: ToolParams, context: &ToolContext) -> Result<Value, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    /// The tool itself refused the operation (e.g. path traversal)
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Simple echo tool for testing purposes.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message. For testing.".to_string(),
            parameters: vec![ParameterSpec::required(
                "message",
                ParameterType::String,
                "The message to echo back",
            )],
            permission: None,
        }
    }

    async fn execute(&self, params: ToolParams, _context: &ToolContext) -> Result<Value, ToolError> {
        let message = params
            .str("message")
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;
        Ok(Value::String(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validate;

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = EchoTool.definition().descriptor();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["name"], "echo");
        assert_eq!(json["input_schema"]["required"][0], "message");
    }

    #[test]
    fn test_tool_result_constructors() {
        let call = ToolCall {
            id: "call_001".to_string(),
            name: "echo".to_string(),
            input: serde_json::json!({"message": "hello"}),
        };
        let ok = ToolResult::ok(&call, Value::String("hello".into()));
        assert!(ok.success());
        assert_eq!(ok.tool_call_id, "call_001");

        let denied = ToolResult::failure(&call, ToolStatus::PermissionDenied, PERMISSION_DENIED);
        assert!(!denied.success());
        assert!(denied.is_permission_denied());
        assert_eq!(denied.error.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_tool_result_serialization_skips_empty_fields() {
        let call = ToolCall {
            id: "c".to_string(),
            name: "echo".to_string(),
            input: Value::Null,
        };
        let json = serde_json::to_value(ToolResult::ok(&call, Value::Bool(true))).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        let def = tool.definition();
        assert_eq!(def.name, "echo");
        assert!(!def.requires_permission());

        let ctx = ToolContext::new("/tmp");
        let params = validate(&def.parameters, serde_json::json!({"message": "hello world"}))
            .unwrap();
        let output = tool.execute(params, &ctx).await.unwrap();
        assert_eq!(output, "hello world");
    }
}
