//! On-disk layout and protocol-wide settings.
//!
//! Layout under a DevEnviro root:
//! - a2a/a2a_config.json              : protocol settings
//! - a2a/agents/agent_registry.json   : agent_id -> registration
//! - a2a/messages/<agent_id>.jsonl    : activity log, one JSON object per line
//! - a2a/queues/<agent_id>/           : mailbox, one JSON file per message

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding the DevEnviro root.
pub const ROOT_ENV: &str = "DEVENVIRO_ROOT";

const A2A_DIR: &str = "a2a";
const MESSAGES_DIR: &str = "messages";
const AGENTS_DIR: &str = "agents";
const QUEUES_DIR: &str = "queues";
const CONFIG_FILE: &str = "a2a_config.json";
const REGISTRY_FILE: &str = "agent_registry.json";

/// Get the DevEnviro root ($DEVENVIRO_ROOT, or ./.devenviro).
pub fn default_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var(ROOT_ENV) {
        if !root.is_empty() {
            return Ok(PathBuf::from(root));
        }
    }

    let cwd = std::env::current_dir()
        .map_err(|e| Error::Config(format!("Could not determine working directory: {}", e)))?;
    Ok(cwd.join(".devenviro"))
}

/// Reject ids that cannot safely name a mailbox directory.
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    let bad = agent_id.is_empty()
        || agent_id == "."
        || agent_id == ".."
        || agent_id.contains(['/', '\\', '\0']);

    if bad {
        return Err(Error::InvalidAgentId(agent_id.to_string()));
    }
    Ok(())
}

/// Resolved paths of the A2A directory protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A2aPaths {
    pub root: PathBuf,
    pub a2a_dir: PathBuf,
    pub messages_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub queues_dir: PathBuf,
    pub config_file: PathBuf,
    pub registry_file: PathBuf,
}

impl A2aPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let a2a_dir = root.join(A2A_DIR);
        let agents_dir = a2a_dir.join(AGENTS_DIR);

        Self {
            messages_dir: a2a_dir.join(MESSAGES_DIR),
            queues_dir: a2a_dir.join(QUEUES_DIR),
            config_file: a2a_dir.join(CONFIG_FILE),
            registry_file: agents_dir.join(REGISTRY_FILE),
            agents_dir,
            a2a_dir,
            root,
        }
    }

    /// Ensure all shared directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.a2a_dir,
            &self.messages_dir,
            &self.agents_dir,
            &self.queues_dir,
        ] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                tracing::debug!("Created A2A directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Mailbox directory of one agent.
    pub fn queue_dir(&self, agent_id: &str) -> PathBuf {
        self.queues_dir.join(agent_id)
    }

    /// Activity log of one agent.
    pub fn activity_log(&self, agent_id: &str) -> PathBuf {
        self.messages_dir.join(format!("{}.jsonl", agent_id))
    }
}

/// Protocol-wide settings persisted in `a2a_config.json`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct A2aConfig {
    #[serde(default = "default_version")]
    pub version: String,

    /// Queue files older than this are removed by cleanup.
    #[serde(default = "default_message_retention_days")]
    pub message_retention_days: u64,

    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Poll interval used while waiting for a response.
    #[serde(default = "default_response_poll_interval_ms")]
    pub response_poll_interval_ms: u64,

    #[serde(default = "default_max_message_size_bytes")]
    pub max_message_size_bytes: usize,

    /// Agents without a heartbeat for this long are no longer active.
    #[serde(default = "default_agent_timeout_minutes")]
    pub agent_timeout_minutes: u64,

    #[serde(default = "default_auto_cleanup_enabled")]
    pub auto_cleanup_enabled: bool,

    #[serde(default)]
    pub realtime: RealtimeConfig,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_message_retention_days() -> u64 {
    7
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_response_poll_interval_ms() -> u64 {
    1000
}

fn default_max_message_size_bytes() -> usize {
    1024 * 1024
}

fn default_agent_timeout_minutes() -> u64 {
    5
}

fn default_auto_cleanup_enabled() -> bool {
    true
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            message_retention_days: default_message_retention_days(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            response_poll_interval_ms: default_response_poll_interval_ms(),
            max_message_size_bytes: default_max_message_size_bytes(),
            agent_timeout_minutes: default_agent_timeout_minutes(),
            auto_cleanup_enabled: default_auto_cleanup_enabled(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl A2aConfig {
    /// Load the config file, writing defaults if it does not exist yet.
    ///
    /// Keys missing from an existing file fall back to their defaults. A file
    /// that cannot be read or parsed is left untouched and defaults are used.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Wrote default A2A config to {}", path.display());
            return Ok(config);
        }

        let loaded = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|content| serde_json::from_str::<Self>(&content).map_err(Error::from));

        match loaded {
            Ok(config) => {
                tracing::debug!("Loaded A2A config from {}", path.display());
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load A2A config {}: {}, using defaults",
                    path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_minutes * 60)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds.max(1))
    }

    pub fn response_poll_interval(&self) -> Duration {
        Duration::from_millis(self.response_poll_interval_ms.max(1))
    }
}

/// Real-time notification settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RealtimeConfig {
    #[serde(default = "default_true")]
    pub enable_file_watching: bool,

    #[serde(default = "default_true")]
    pub enable_background_polling: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between a watch event and reading the file back.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_true")]
    pub log_all_notifications: bool,

    /// Send heartbeats while monitoring is active.
    #[serde(default = "default_true")]
    pub enable_heartbeat: bool,

    /// Number of dispatched message ids remembered for de-duplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_dedup_capacity() -> usize {
    4096
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enable_file_watching: true,
            enable_background_polling: true,
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            log_all_notifications: true,
            enable_heartbeat: true,
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl RealtimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
