//! Shell commands run through `sh -c`.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::resolve_path;
use crate::permission::PermissionType;
use crate::schema::{ParameterSpec, ParameterType, ToolParams};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Characters that make a command more than a single program invocation.
const SHELL_CONTROL: &[char] = &[';', '|', '&', '`', '$', '(', ')', '<', '>', '\n'];

/// Run a shell command in the working directory.
///
/// Gated by the shell permission. The scope is the program name, so granting
/// `git` allows `git status` but not `rm`. Anything using pipes, redirects,
/// substitution or command lists has no scope and needs the global grant.
pub struct BashTool;

fn program_scope(command: &str) -> Option<String> {
    if command.contains(SHELL_CONTROL) {
        return None;
    }
    command.split_whitespace().next().map(str::to_string)
}

fn requested_timeout(params: &ToolParams) -> Duration {
    match params.integer("timeout_secs") {
        Some(secs) => Duration::from_secs(secs.max(1) as u64).min(MAX_TIMEOUT),
        None => DEFAULT_TIMEOUT,
    }
}

/// Captured result of one finished command.
struct Finished {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl Finished {
    fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n--- stderr ---\n{}", self.stdout, self.stderr),
        }
    }
}

async fn run(command: &str, dir: &Path, limit: Duration) -> Result<Finished, ToolError> {
    let child = Command::new("sh")
        .args(["-c", command])
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::ExecutionFailed(format!("could not start sh: {e}")))?;

    // On timeout the child is dropped, which kills it
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| {
            warn!(command, ?limit, "command timed out");
            ToolError::Timeout(limit)
        })?
        .map_err(|e| ToolError::ExecutionFailed(format!("waiting for command: {e}")))?;

    Ok(Finished {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[async_trait]
impl Tool for BashTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "bash".to_string(),
            description: "Run a shell command and return its combined output.".to_string(),
            parameters: vec![
                ParameterSpec::required("command", ParameterType::String, "Command line passed to sh -c"),
                ParameterSpec::optional(
                    "timeout_secs",
                    ParameterType::Integer,
                    "Seconds before the command is killed (default 30, max 300)",
                ),
                ParameterSpec::optional(
                    "working_dir",
                    ParameterType::String,
                    "Directory to run in, relative to the working directory",
                ),
            ],
            permission: Some(PermissionType::Shell),
        }
    }

    fn permission_scope(&self, params: &ToolParams, _context: &ToolContext) -> Option<String> {
        params.str("command").and_then(program_scope)
    }

    async fn execute(&self, params: ToolParams, context: &ToolContext) -> Result<Value, ToolError> {
        let command = params
            .str("command")
            .ok_or_else(|| ToolError::InvalidInput("command is required".to_string()))?;
        let dir = match params.str("working_dir") {
            Some(requested) => resolve_path(&context.working_directory, requested)?,
            None => context.working_directory.clone(),
        };
        let limit = requested_timeout(&params);
        debug!(command, dir = %dir.display(), ?limit, "running command");

        let finished = run(command, &dir, limit).await?;
        let output = finished.combined();
        match finished.code {
            Some(0) if output.is_empty() => Ok(Value::String("(no output)".to_string())),
            Some(0) => Ok(Value::String(output)),
            code => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                debug!(%code, "command failed");
                Err(ToolError::ExecutionFailed(format!(
                    "exit code {code}: {}",
                    output.trim_end()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::params;
    use serde_json::json;

    async fn sh(input: Value) -> Result<Value, ToolError> {
        BashTool
            .execute(params(&BashTool, input), &ToolContext::new("/tmp"))
            .await
    }

    #[tokio::test]
    async fn test_stdout_is_returned() {
        let out = sh(json!({"command": "echo hello"})).await.unwrap();
        assert_eq!(out.as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn test_silent_success() {
        assert_eq!(sh(json!({"command": "true"})).await.unwrap(), "(no output)");
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_stderr() {
        let err = sh(json!({"command": "echo oops >&2; exit 3"})).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed(msg) => assert_eq!(msg, "exit code 3: oops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_working_dir_cannot_escape() {
        let err = sh(json!({"command": "ls", "working_dir": "/tmp/../etc"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let err = sh(json!({"command": "sleep 5", "timeout_secs": 1})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[test]
    fn test_timeout_is_clamped() {
        let p = params(&BashTool, json!({"command": "ls", "timeout_secs": 9000}));
        assert_eq!(requested_timeout(&p), MAX_TIMEOUT);
        let p = params(&BashTool, json!({"command": "ls"}));
        assert_eq!(requested_timeout(&p), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_scope_is_program_name() {
        assert_eq!(program_scope("git status --short").as_deref(), Some("git"));
        assert_eq!(program_scope("  ls"), Some("ls".to_string()));
        assert_eq!(program_scope("ls; rm -rf /"), None);
        assert_eq!(program_scope("cat $(which sh)"), None);
        assert_eq!(program_scope(""), None);

        let p = params(&BashTool, json!({"command": "cargo fmt"}));
        assert_eq!(BashTool.permission_scope(&p, &ToolContext::new("/tmp")).as_deref(), Some("cargo"));
    }
}
