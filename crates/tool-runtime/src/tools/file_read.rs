//! Line-windowed file reads.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::resolve_path;
use crate::schema::{ParameterSpec, ParameterType, ToolParams};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

/// Bytes inspected for a NUL when deciding a file is not text.
const SNIFF_LEN: usize = 8192;

pub struct FileReadTool;

/// 1-based, inclusive start; `len` of `None` runs to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineWindow {
    first: usize,
    len: Option<usize>,
}

impl LineWindow {
    fn from_params(params: &ToolParams) -> Self {
        Self {
            first: params.integer("offset").map_or(1, |n| n.max(1) as usize),
            len: params.integer("limit").map(|n| n.max(0) as usize),
        }
    }

    /// Render the selected lines, each prefixed with its line number.
    fn render(&self, text: &str) -> String {
        let numbered = text
            .lines()
            .enumerate()
            .skip(self.first - 1)
            .map(|(idx, line)| format!("{:>6}\t{line}", idx + 1));
        match self.len {
            Some(n) => numbered.take(n).collect::<Vec<_>>().join("\n"),
            None => numbered.collect::<Vec<_>>().join("\n"),
        }
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(SNIFF_LEN).any(|b| *b == 0)
}

#[async_trait]
impl Tool for FileReadTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_read".to_string(),
            description: "Read a text file, optionally a window of lines, with line numbers."
                .to_string(),
            parameters: vec![
                ParameterSpec::required(
                    "path",
                    ParameterType::String,
                    "File to read, relative to the working directory or absolute",
                ),
                ParameterSpec::optional("offset", ParameterType::Integer, "First line to return (1-based)"),
                ParameterSpec::optional("limit", ParameterType::Integer, "How many lines to return"),
            ],
            permission: None,
        }
    }

    async fn execute(&self, params: ToolParams, context: &ToolContext) -> Result<Value, ToolError> {
        let requested = params
            .str("path")
            .ok_or_else(|| ToolError::InvalidInput("path is required".to_string()))?;
        let path = resolve_path(&context.working_directory, requested)?;
        let window = LineWindow::from_params(&params);
        debug!(path = %path.display(), ?window, "reading file");

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("cannot read {}: {e}", path.display())))?;

        if looks_binary(&bytes) {
            return Ok(json!(format!("Binary file, {} bytes", bytes.len())));
        }
        Ok(Value::String(window.render(&String::from_utf8_lossy(&bytes))))
    }
}
