//! Whole-file writes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

use super::resolve_path;
use crate::permission::PermissionType;
use crate::schema::{ParameterSpec, ParameterType, ToolParams};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// Create or overwrite a file, making any missing parent directories.
///
/// Gated by a filesystem permission on the resolved path, so a grant for a
/// directory covers every file below it.
pub struct FileWriteTool;

async fn write_creating_dirs(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

#[async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_write".to_string(),
            description: "Create or overwrite a file with the given content.".to_string(),
            parameters: vec![
                ParameterSpec::required(
                    "path",
                    ParameterType::String,
                    "File to write, relative to the working directory or absolute",
                ),
                ParameterSpec::required("content", ParameterType::String, "Full new file content"),
            ],
            permission: Some(PermissionType::Filesystem),
        }
    }

    fn permission_scope(&self, params: &ToolParams, context: &ToolContext) -> Option<String> {
        let requested = params.str("path")?;
        Some(match resolve_path(&context.working_directory, requested) {
            Ok(path) => path.display().to_string(),
            Err(_) => requested.to_string(),
        })
    }

    async fn execute(&self, params: ToolParams, context: &ToolContext) -> Result<Value, ToolError> {
        let (Some(requested), Some(content)) = (params.str("path"), params.str("content")) else {
            return Err(ToolError::InvalidInput("path and content are required".to_string()));
        };
        let path = resolve_path(&context.working_directory, requested)?;
        debug!(path = %path.display(), len = content.len(), "writing file");

        write_creating_dirs(&path, content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot write {}: {e}", path.display())))?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }
}
