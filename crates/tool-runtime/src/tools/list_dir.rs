//! Directory listing tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::resolve_path;
use crate::schema::{ParameterSpec, ParameterType, ToolParams};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// List directory entries, sorted by name.
pub struct ListDirTool;

impl ListDirTool {
    const MAX_ENTRIES: usize = 1000;
}

#[async_trait]
impl Tool for ListDirTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_dir".to_string(),
            description: "List the entries of a directory with their kind and size.".to_string(),
            parameters: vec![ParameterSpec::optional(
                "path",
                ParameterType::String,
                "Directory to list (relative to working directory or absolute, default '.')",
            )],
            permission: None,
        }
    }

    async fn execute(&self, params: ToolParams, context: &ToolContext) -> Result<Value, ToolError> {
        let requested = params.str("path").unwrap_or(".");
        let dir = resolve_path(&context.working_directory, requested)?;
        debug!(path = %dir.display(), "listing directory");

        let mut reader = tokio::fs::read_dir(&dir).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to list '{}': {e}", dir.display()))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to read entry: {e}")))?
        {
            let file_type = entry.file_type().await.ok();
            let kind = match file_type {
                Some(t) if t.is_dir() => "dir",
                Some(t) if t.is_symlink() => "symlink",
                Some(_) => "file",
                None => "unknown",
            };
            let size = match kind {
                "file" => entry.metadata().await.map(|m| m.len()).ok(),
                _ => None,
            };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "kind": kind,
                "size": size,
            }));
        }

        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        let truncated = entries.len() > Self::MAX_ENTRIES;
        entries.truncate(Self::MAX_ENTRIES);

        Ok(json!({
            "path": dir.display().to_string(),
            "entries": entries,
            "truncated": truncated,
        }))
    }
}
