use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WardenError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ── Top-level config ──────────────────────────────────────────

/// Session configuration for the agent, loaded from TOML with env overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub compaction: CompactionSettings,
    #[serde(default)]
    pub permissions: PermissionSettings,
}

impl AgentConfig {
    /// Return the default config directory path: ~/.config/warden/
    pub fn default_config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("could not determine user config directory")?
            .join("warden");
        Ok(dir)
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from the given path, or the default path, then apply
    /// `WARDEN_*` environment overrides. A `.env` file in the working
    /// directory is read first. A missing config file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_dotenv();
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_path.exists() {
            debug!(?config_path, "Loading config");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read config: {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("failed to parse config: {}", config_path.display()))?
        } else {
            debug!(?config_path, "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        toml::from_str(content).map_err(|e| WardenError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(env_opt);
    }

    /// Apply `WARDEN_*` overrides from `lookup`. Empty values are ignored by
    /// `env_opt`; unparsable numbers leave the file value in place.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(rounds) = lookup("WARDEN_MAX_ROUNDS").and_then(|v| v.parse().ok()) {
            self.agent.max_rounds = rounds;
        }
        if let Some(requery) = lookup("WARDEN_REQUERY").map(|v| parse_bool(&v)) {
            self.agent.requery_after_tools = requery;
        }
        if let Some(dir) = lookup("WARDEN_WORKING_DIR") {
            self.agent.working_directory = Some(PathBuf::from(dir));
        }
        if let Some(store) = lookup("WARDEN_PERMISSION_STORE") {
            self.permissions.store_path = Some(PathBuf::from(store));
        }
    }

    /// Working directory for tools: configured value or the process cwd.
    pub fn working_directory(&self) -> PathBuf {
        self.agent
            .working_directory
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  agent:       max_rounds={}, requery={}, streaming={}",
            self.agent.max_rounds,
            self.agent.requery_after_tools,
            self.agent.streaming
        );
        tracing::info!(
            "  compaction:  threshold={}, keep_recent={}, auto={}",
            self.compaction.threshold(),
            self.compaction.keep_recent(),
            self.compaction.auto
        );
        tracing::info!(
            "  permissions: store={}, timeout={}",
            self.permissions
                .store_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(memory)".to_string()),
            self.permissions
                .request_timeout_secs
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "none".to_string())
        );
    }
}

// ── Agent loop ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Hard cap on model round-trips per user turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Send tool results back to the model after each batch
    #[serde(default = "default_true")]
    pub requery_after_tools: bool,
    /// Surface text chunks as they arrive instead of after the response
    #[serde(default = "default_true")]
    pub streaming: bool,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_max_rounds() -> usize {
    25
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            requery_after_tools: true,
            streaming: true,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            working_directory: None,
        }
    }
}

// ── Compaction ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSettings {
    #[serde(default = "default_base_window")]
    pub base_window: usize,
    /// Message count that triggers auto-compaction (default: 2 × base_window)
    #[serde(default)]
    pub threshold: Option<usize>,
    /// Messages kept verbatim at the tail (default: base_window)
    #[serde(default)]
    pub keep_recent: Option<usize>,
    #[serde(default = "default_true")]
    pub auto: bool,
    /// Characters kept from each summarized message
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

fn default_base_window() -> usize {
    20
}

fn default_summary_chars() -> usize {
    100
}

impl CompactionSettings {
    pub fn threshold(&self) -> usize {
        self.threshold.unwrap_or(self.base_window * 2)
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent.unwrap_or(self.base_window)
    }
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            base_window: default_base_window(),
            threshold: None,
            keep_recent: None,
            auto: true,
            summary_chars: default_summary_chars(),
        }
    }
}

// ── Permissions ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSettings {
    /// JSON file the permission ledger is loaded from and saved to
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Seconds to wait for a human decision before denying
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}
