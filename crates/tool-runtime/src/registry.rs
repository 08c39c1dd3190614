use crate::permission::{PermissionError, PermissionLedger};
use crate::schema::validate;
use crate::tool::{
    Tool, ToolCall, ToolContext, ToolDefinition, ToolDescriptor, ToolResult, ToolStatus,
    CANCELLED, NOT_FOUND, PERMISSION_DENIED,
};
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// Manages available tools, their schemas, and dispatch.
///
/// Read-mostly after startup; registration order is kept so the schema sent
/// to the model is stable.
pub struct ToolRegistry {
    tools: RwLock<IndexMap<String, Arc<dyn Tool>>>,
    ledger: Arc<PermissionLedger>,
}

impl ToolRegistry {
    pub fn new(ledger: Arc<PermissionLedger>) -> Self {
        Self {
            tools: RwLock::new(IndexMap::new()),
            ledger,
        }
    }

    /// Register a tool. A duplicate name is logged and rejected; the
    /// existing tool stays in place.
    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let def = tool.definition();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&def.name) {
            warn!(tool = %def.name, "Tool already registered, ignoring duplicate");
            return Err(RegistryError::DuplicateName(def.name));
        }
        debug!(tool = %def.name, "Registered tool");
        tools.insert(def.name, tool);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .is_some()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.definition())
            .collect()
    }

    /// Tool descriptors for the model, built from the registry as it is now.
    pub fn schema(&self) -> Vec<ToolDescriptor> {
        self.definitions().iter().map(ToolDefinition::descriptor).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ledger(&self) -> &Arc<PermissionLedger> {
        &self.ledger
    }

    /// Run one tool call end to end: lookup, input validation, permission
    /// gate, execution. Never fails; every outcome is a [`ToolResult`].
    pub async fn invoke(
        &self,
        call: &ToolCall,
        context: &ToolContext,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model requested unknown tool");
            return ToolResult::failure(call, ToolStatus::NotFound, NOT_FOUND);
        };
        let def = tool.definition();

        let params = match validate(&def.parameters, call.input.clone()) {
            Ok(params) => params,
            Err(e) => {
                debug!(tool = %call.name, error = %e, "Rejected tool input");
                return ToolResult::failure(call, ToolStatus::InvalidInput, format!("invalid input: {e}"));
            }
        };

        if let Some(kind) = def.permission {
            let scope = tool.permission_scope(&params, context);
            let reason = format!("{} wants {} access", def.name, kind);
            match self
                .ledger
                .request_and_wait(&def.name, kind, scope.as_deref(), Some(&reason), cancel)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(tool = %def.name, scope = ?scope, "Permission denied");
                    return ToolResult::failure(call, ToolStatus::PermissionDenied, PERMISSION_DENIED);
                }
                Err(PermissionError::Cancelled) => {
                    return ToolResult::failure(call, ToolStatus::Cancelled, CANCELLED);
                }
                Err(e) => {
                    warn!(tool = %def.name, error = %e, "Permission check failed, denying");
                    return ToolResult::failure(call, ToolStatus::PermissionDenied, PERMISSION_DENIED);
                }
            }
        }

        let span = info_span!("tool", name = %call.name, call_id = %call.id);
        let execution = AssertUnwindSafe(tool.execute(params, context).instrument(span)).catch_unwind();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::failure(call, ToolStatus::Cancelled, CANCELLED),
            outcome = execution => match outcome {
                Ok(Ok(output)) => ToolResult::ok(call, output),
                Ok(Err(e)) => {
                    debug!(tool = %call.name, error = %e, "Tool failed");
                    ToolResult::failure(call, ToolStatus::Failed, e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(tool = %call.name, %message, "Tool panicked");
                    ToolResult::failure(call, ToolStatus::Failed, format!("tool panicked: {message}"))
                }
            },
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Arc::new(PermissionLedger::new()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}
