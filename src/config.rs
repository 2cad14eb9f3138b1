//! Top-level application configuration.
//!
//! Configuration is stored in `.trackbridge/config.yaml` (or under
//! `$TRACKBRIDGE_ROOT`) and includes:
//! - The acting user and the board/tracker project pair
//! - Authentication tokens for both remote systems
//! - Column, tag and findings-state translation tables
//! - Storage backend selection, sync tuning and scheduler intervals

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::mapper::{ColumnMapping, TagMapping};
use crate::types::Scope;

/// Environment variable overriding the data root directory.
pub const ROOT_ENV: &str = "TRACKBRIDGE_ROOT";
pub const BOARD_TOKEN_ENV: &str = "TRACKBRIDGE_BOARD_TOKEN";
pub const TRACKER_TOKEN_ENV: &str = "TRACKBRIDGE_TRACKER_TOKEN";
pub const USER_ENV: &str = "TRACKBRIDGE_USER";

const DEFAULT_ROOT: &str = ".trackbridge";
const DEFAULT_USER: &str = "default";

/// Directory holding config, file-backend data and the SQLite database.
pub fn data_root() -> PathBuf {
    match env::var(ROOT_ENV) {
        Ok(root) if !root.is_empty() => PathBuf::from(root),
        _ => PathBuf::from(DEFAULT_ROOT),
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Acting user; scopes mappings, ignores and operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub board: BoardConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub mapping: MappingConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON documents and an NDJSON audit log under the data root
    #[default]
    File,
    /// A single SQLite database
    Sqlite,
}

enum_display_fromstr!(StorageBackend, BridgeError::InvalidBackend, {
    File => "file",
    Sqlite => "sqlite" | "sql",
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Overrides the default location (`<root>/data` or `<root>/trackbridge.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self, root: &Path) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend {
            StorageBackend::File => root.join("data"),
            StorageBackend::Sqlite => root.join("trackbridge.db"),
        }
    }
}

/// Task board connection
#[derive(Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default = "default_board_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Board project identifier
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

fn default_board_url() -> String {
    "https://app.asana.com/api/1.0".to_string()
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: default_board_url(),
            token: None,
            project: String::new(),
            workspace: None,
        }
    }
}

impl fmt::Debug for BoardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("project", &self.project)
            .field("workspace", &self.workspace)
            .finish()
    }
}

/// Issue tracker connection
#[derive(Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Internal project id used when creating issues
    #[serde(default)]
    pub project_id: String,
    /// Short project key used in queries and readable ids (e.g. `SEC`)
    #[serde(default)]
    pub project_key: String,
    #[serde(default = "default_state_field")]
    pub state_field: String,
    #[serde(default = "default_subsystem_field")]
    pub subsystem_field: String,
}

fn default_state_field() -> String {
    "State".to_string()
}

fn default_subsystem_field() -> String {
    "Subsystem".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            project_id: String::new(),
            project_key: String::new(),
            state_field: default_state_field(),
            subsystem_field: default_subsystem_field(),
        }
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("project_id", &self.project_id)
            .field("project_key", &self.project_key)
            .field("state_field", &self.state_field)
            .field("subsystem_field", &self.subsystem_field)
            .finish()
    }
}

/// Translation tables between board and tracker vocabularies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    #[serde(default)]
    pub tags: Vec<TagMapping>,
    /// Tracker states that always need human triage
    #[serde(default)]
    pub findings_states: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Days a rollback snapshot is kept (default: 30)
    #[serde(default = "default_retention_days")]
    pub snapshot_retention_days: u32,
    /// Tickets processed concurrently within one batch (default: 4)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Remote request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Treat orphaned issues as create-candidates for the board
    #[serde(default)]
    pub reverse: bool,
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_retention_days: default_retention_days(),
            max_concurrency: default_max_concurrency(),
            request_timeout: default_request_timeout(),
            reverse: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between auto-sync ticks (default: 300)
    #[serde(default = "default_auto_sync_interval")]
    pub auto_sync_interval: u64,
    /// Seconds between auto-create ticks (default: 900)
    #[serde(default = "default_auto_create_interval")]
    pub auto_create_interval: u64,
}

fn default_auto_sync_interval() -> u64 {
    300
}

fn default_auto_create_interval() -> u64 {
    900
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval: default_auto_sync_interval(),
            auto_create_interval: default_auto_create_interval(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        data_root().join("config.yaml")
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml_ng::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml_ng::to_string(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.mapping.columns {
            if column.column.trim().is_empty() {
                return Err(BridgeError::Config(
                    "column mapping with an empty column name".to_string(),
                ));
            }
            if !seen.insert(column.column.to_lowercase()) {
                return Err(BridgeError::Config(format!(
                    "column '{}' is mapped more than once",
                    column.column
                )));
            }
        }

        seen.clear();
        for tag in &self.mapping.tags {
            if tag.tag.trim().is_empty() {
                return Err(BridgeError::Config(
                    "tag mapping with an empty tag name".to_string(),
                ));
            }
            if !seen.insert(tag.tag.to_lowercase()) {
                return Err(BridgeError::Config(format!(
                    "tag '{}' is mapped more than once",
                    tag.tag
                )));
            }
        }

        if self.sync.max_concurrency == 0 {
            return Err(BridgeError::Config(
                "sync.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.auto_sync_interval == 0 || self.scheduler.auto_create_interval == 0 {
            return Err(BridgeError::Config(
                "scheduler intervals must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Acting user: environment first, then config, then `default`.
    pub fn user(&self) -> String {
        if let Ok(user) = env::var(USER_ENV)
            && !user.is_empty()
        {
            return user;
        }
        self.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string())
    }

    /// The (user, project pair) this configuration operates on.
    pub fn scope(&self) -> Scope {
        Scope::new(
            self.user(),
            format!("{}:{}", self.board.project, self.tracker.project_key),
        )
    }

    /// Get the board token from environment or config
    pub fn board_token(&self) -> Option<String> {
        if let Ok(token) = env::var(BOARD_TOKEN_ENV)
            && !token.is_empty()
        {
            return Some(token);
        }
        self.board.token.clone()
    }

    /// Get the tracker token from environment or config
    pub fn tracker_token(&self) -> Option<String> {
        if let Ok(token) = env::var(TRACKER_TOKEN_ENV)
            && !token.is_empty()
        {
            return Some(token);
        }
        self.tracker.token.clone()
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage.resolved_path(&data_root())
    }
}
