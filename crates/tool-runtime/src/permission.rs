//! Append-only permission ledger with an asynchronous request/resolve protocol.
//!
//! Grants and revokes are never deleted; the effective state for a scope is
//! read from its latest record. Requests that need a human decision are
//! parked in an id-keyed map of oneshot senders until a prompt collaborator
//! calls [`PermissionLedger::resolve`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use warden_core::{PermissionSettings, WardenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionType {
    Filesystem,
    Shell,
    Network,
    Embedding,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Filesystem => "filesystem",
            PermissionType::Shell => "shell",
            PermissionType::Network => "network",
            PermissionType::Embedding => "embedding",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grant or revoke record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub tool_name: String,
    #[serde(rename = "type")]
    pub kind: PermissionType,
    /// `None` is the tool's global record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub granted: bool,
    pub timestamp: DateTime<Utc>,
}

impl Permission {
    fn matches(&self, tool_name: &str, kind: PermissionType) -> bool {
        self.tool_name == tool_name && self.kind == kind
    }
}

/// Persisted form of the ledger: `{ "tools": { name: [Permission...] } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    #[serde(default)]
    pub tools: BTreeMap<String, Vec<Permission>>,
}

impl PermissionSnapshot {
    /// Read a snapshot from disk. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, WardenError> {
        if !path.exists() {
            debug!(path = %path.display(), "No permission store, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), WardenError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.tools.values().map(Vec::len).sum()
    }
}

/// A decision request handed to the prompt collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionPrompt {
    pub request_id: Uuid,
    pub tool_name: String,
    #[serde(rename = "type")]
    pub kind: PermissionType,
    pub scope: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("prompt channel closed")]
    ChannelClosed,
    #[error("prompt failed: {0}")]
    Failed(String),
}

/// Surfaces a permission request to a human. The answer comes back
/// separately through [`PermissionLedger::resolve`], keyed by `request_id`.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    async fn prompt(&self, request: PermissionPrompt) -> Result<(), PromptError>;
}

/// Forwards prompts to a UI task over an mpsc channel.
pub struct ChannelPrompter {
    tx: mpsc::Sender<PermissionPrompt>,
}

impl ChannelPrompter {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PermissionPrompt>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PermissionPrompter for ChannelPrompter {
    async fn prompt(&self, request: PermissionPrompt) -> Result<(), PromptError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| PromptError::ChannelClosed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("permission request cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] WardenError),
}

struct PendingEntry {
    prompt: PermissionPrompt,
    responder: oneshot::Sender<bool>,
}

/// Removes a pending entry when the waiter goes away, whichever way it ends.
struct PendingGuard<'a> {
    ledger: &'a PermissionLedger,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.ledger.take_pending(&self.id).is_some() {
            debug!(request_id = %self.id, "Pending permission request dropped");
        }
    }
}

pub struct PermissionLedger {
    records: RwLock<Vec<Permission>>,
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
    prompter: Option<Arc<dyn PermissionPrompter>>,
    request_timeout: Option<Duration>,
}

impl PermissionLedger {
    /// Empty ledger with no prompter: every ungranted request is denied.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            prompter: None,
            request_timeout: None,
        }
    }

    pub fn from_snapshot(snapshot: PermissionSnapshot) -> Self {
        let ledger = Self::new();
        {
            let mut records = ledger.write_records();
            for (_, perms) in snapshot.tools {
                records.extend(perms);
            }
        }
        ledger
    }

    /// Build from config: loads the store file if one is set.
    pub fn from_settings(settings: &PermissionSettings) -> Result<Self, WardenError> {
        let mut ledger = match &settings.store_path {
            Some(path) => Self::from_snapshot(PermissionSnapshot::load(path)?),
            None => Self::new(),
        };
        ledger.request_timeout = settings.request_timeout_secs.map(Duration::from_secs);
        Ok(ledger)
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn PermissionPrompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Deny requests nobody answers within `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn read_records(&self) -> std::sync::RwLockReadGuard<'_, Vec<Permission>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Permission>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self, id: &Uuid) -> Option<PendingEntry> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Pure read of the effective state.
    ///
    /// Candidates are the exact scope, every recorded ancestor directory (for
    /// filesystem only) and the global record. Each candidate is decided by
    /// its own latest record; any granting candidate wins.
    pub fn has_permission(&self, tool_name: &str, kind: PermissionType, scope: Option<&str>) -> bool {
        let records = self.read_records();
        let latest = |candidate: Option<&str>| {
            records
                .iter()
                .rev()
                .find(|p| p.matches(tool_name, kind) && p.scope.as_deref() == candidate)
                .map(|p| p.granted)
        };

        if let Some(scope) = scope {
            if latest(Some(scope)) == Some(true) {
                return true;
            }
            if kind == PermissionType::Filesystem {
                let ancestors: BTreeSet<&str> = records
                    .iter()
                    .filter(|p| p.matches(tool_name, kind))
                    .filter_map(|p| p.scope.as_deref())
                    .filter(|p| is_path_ancestor(p, scope))
                    .collect();
                if ancestors.into_iter().any(|a| latest(Some(a)) == Some(true)) {
                    return true;
                }
            }
        }
        latest(None) == Some(true)
    }

    pub fn grant(&self, tool_name: &str, kind: PermissionType, scope: Option<&str>) {
        self.append(tool_name, kind, scope, true);
    }

    pub fn revoke(&self, tool_name: &str, kind: PermissionType, scope: Option<&str>) {
        self.append(tool_name, kind, scope, false);
    }

    fn append(&self, tool_name: &str, kind: PermissionType, scope: Option<&str>, granted: bool) {
        info!(
            tool = tool_name,
            kind = %kind,
            scope = scope.unwrap_or("*"),
            granted,
            "Permission recorded"
        );
        self.write_records().push(Permission {
            tool_name: tool_name.to_string(),
            kind,
            scope: scope.map(str::to_string),
            granted,
            timestamp: Utc::now(),
        });
    }

    /// Return the effective decision, asking a human if nothing grants it yet.
    ///
    /// Fails closed: no prompter, a prompter error, a dropped request or an
    /// expired timeout all resolve to `false`. Cancelling `cancel` returns
    /// [`PermissionError::Cancelled`]. The pending entry is removed on every
    /// exit path.
    pub async fn request_and_wait(
        &self,
        tool_name: &str,
        kind: PermissionType,
        scope: Option<&str>,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<bool, PermissionError> {
        if self.has_permission(tool_name, kind, scope) {
            return Ok(true);
        }
        let Some(prompter) = self.prompter.clone() else {
            warn!(tool = tool_name, kind = %kind, "No permission prompter configured, denying");
            return Ok(false);
        };

        let (tx, rx) = oneshot::channel();
        let prompt = PermissionPrompt {
            request_id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            kind,
            scope: scope.map(str::to_string),
            reason: reason.map(str::to_string),
            created_at: Utc::now(),
        };
        let id = prompt.request_id;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                PendingEntry {
                    prompt: prompt.clone(),
                    responder: tx,
                },
            );
        let _guard = PendingGuard { ledger: self, id };
        debug!(request_id = %id, tool = tool_name, "Awaiting permission decision");

        let prompted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PermissionError::Cancelled),
            r = prompter.prompt(prompt) => r,
        };
        if let Err(e) = prompted {
            warn!(request_id = %id, error = %e, "Permission prompt failed, denying");
            return Ok(false);
        }

        let decision = async move {
            match self.request_timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(answer) => answer.unwrap_or(false),
                    Err(_) => {
                        warn!(request_id = %id, ?limit, "Permission request timed out, denying");
                        false
                    }
                },
                None => rx.await.unwrap_or(false),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PermissionError::Cancelled),
            granted = decision => Ok(granted),
        }
    }

    /// Answer a pending request. Unknown ids are ignored; returns whether a
    /// waiter was found.
    pub fn resolve(&self, request_id: Uuid, granted: bool) -> bool {
        match self.take_pending(&request_id) {
            Some(entry) => {
                debug!(%request_id, granted, "Permission request resolved");
                let _ = entry.responder.send(granted);
                true
            }
            None => {
                debug!(%request_id, "Resolve for unknown permission request ignored");
                false
            }
        }
    }

    /// Answer a pending request and remember the answer for its scope.
    pub fn resolve_persistent(&self, request_id: Uuid, granted: bool) -> bool {
        let Some(entry) = self.take_pending(&request_id) else {
            debug!(%request_id, "Resolve for unknown permission request ignored");
            return false;
        };
        let p = &entry.prompt;
        self.append(&p.tool_name, p.kind, p.scope.as_deref(), granted);
        let _ = entry.responder.send(granted);
        true
    }

    /// Drop a pending request; its waiter sees a denial.
    pub fn abandon(&self, request_id: Uuid) -> bool {
        self.take_pending(&request_id).is_some()
    }

    /// Outstanding prompts, oldest first.
    pub fn pending_requests(&self) -> Vec<PermissionPrompt> {
        let mut prompts: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.prompt.clone())
            .collect();
        prompts.sort_by_key(|p| p.created_at);
        prompts
    }

    pub fn snapshot(&self) -> PermissionSnapshot {
        let mut tools: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
        for record in self.read_records().iter() {
            tools
                .entry(record.tool_name.clone())
                .or_default()
                .push(record.clone());
        }
        PermissionSnapshot { tools }
    }

    pub fn save(&self, path: &Path) -> Result<(), WardenError> {
        let snapshot = self.snapshot();
        snapshot.save(path)?;
        info!(path = %path.display(), records = snapshot.record_count(), "Permissions saved");
        Ok(())
    }
}

impl Default for PermissionLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// `ancestor` is a strict prefix of `path` ending on a separator, so
/// `/work/project` covers `/work/project/a` but not `/work/project-old`.
fn is_path_ancestor(ancestor: &str, path: &str) -> bool {
    match path.strip_prefix(ancestor) {
        Some(rest) if !rest.is_empty() => {
            ancestor.ends_with(std::path::is_separator) || rest.starts_with(std::path::is_separator)
        }
        _ => false,
    }
}
