pub mod config;
pub mod error;
pub mod logging;

pub use config::{AgentConfig, AgentSettings, CompactionSettings, PermissionSettings};
pub use error::*;
