//! Built-in tool implementations for the agentic runtime.
//!
//! - `list_dir`, `file_read`: read-only, no permission required
//! - `file_write`: filesystem permission scoped to the resolved path
//! - `bash`: shell permission scoped to the program being run

pub mod bash;
pub mod file_read;
pub mod file_write;
pub mod list_dir;

pub use bash::BashTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use list_dir::ListDirTool;

use std::path::{Component, Path, PathBuf};

use crate::registry::{RegistryError, ToolRegistry};
use crate::tool::ToolError;

/// Register every built-in tool.
pub fn register_builtin(registry: &ToolRegistry) -> Result<(), RegistryError> {
    registry.register(ListDirTool)?;
    registry.register(FileReadTool)?;
    registry.register(FileWriteTool)?;
    registry.register(BashTool)?;
    Ok(())
}

/// Resolve `requested` against the working directory, rejecting any `..`
/// component.
pub(crate) fn resolve_path(base: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let path = Path::new(requested);
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(ToolError::Forbidden(
            "path traversal ('..') not allowed".to_string(),
        ));
    }
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    })
}

#[cfg(test)]
pub(crate) fn params(
    tool: &dyn crate::tool::Tool,
    input: serde_json::Value,
) -> crate::schema::ToolParams {
    crate::schema::validate(&tool.definition().parameters, input).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionLedger;
    use std::sync::Arc;

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/work");
        assert_eq!(resolve_path(base, "src/lib.rs").unwrap(), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(resolve_path(base, "/etc/hosts").unwrap(), PathBuf::from("/etc/hosts"));
        assert_eq!(resolve_path(base, "notes..md").unwrap(), PathBuf::from("/work/notes..md"));
        assert!(matches!(resolve_path(base, "../up"), Err(ToolError::Forbidden(_))));
    }

    #[test]
    fn test_register_builtin() {
        let registry = ToolRegistry::new(Arc::new(PermissionLedger::new()));
        register_builtin(&registry).unwrap();
        assert_eq!(registry.names(), vec!["list_dir", "file_read", "file_write", "bash"]);
        assert!(register_builtin(&registry).is_err());
    }
}
