pub mod bridge;
pub mod compaction;
pub mod conversation;
pub mod message;
pub mod permission;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod stream;
pub mod tool;
pub mod tools;

pub use bridge::{BlockingGateway, CompletionModel};
pub use compaction::{CompactionPolicy, CompactionReport};
pub use conversation::{Conversation, ConversationError};
pub use message::{ContentBlock, Message, MessageContent, Role};
pub use permission::{
    ChannelPrompter, Permission, PermissionError, PermissionLedger, PermissionPrompt,
    PermissionPrompter, PermissionSnapshot, PermissionType, PromptError,
};
pub use provider::{EventStream, GatewayError, ModelGateway, ModelOptions, ModelRequest, ModelResponse};
pub use registry::{RegistryError, ToolRegistry};
pub use runtime::{
    AgenticLoop, AgenticLoopError, LoopConfig, LoopState, ToolExecution, TurnEvent, TurnOutcome,
    TurnSummary,
};
pub use schema::{ParamValue, ParameterSpec, ParameterType, SchemaError, ToolParams};
pub use stream::{ResponseAccumulator, StopReason, StreamEvent};
pub use tool::{
    Tool, ToolCall, ToolContext, ToolDefinition, ToolDescriptor, ToolError, ToolResult, ToolStatus,
};
pub use tools::{BashTool, FileReadTool, FileWriteTool, ListDirTool};
