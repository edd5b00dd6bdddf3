//! Agent registry - shared `agent_registry.json` mapping agent ids to registrations.
//!
//! Every agent process writes this file. Mutations re-read the file under a
//! lock and replace it atomically, so concurrent heartbeats do not clobber
//! each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::protocol::mailbox::write_json_atomic;
use crate::protocol::timestamp;
use crate::protocol::types::AgentStatus;

use super::lock::with_lock;

/// Registry file contents, keyed by agent id.
pub type Registrations = BTreeMap<String, AgentRegistration>;

/// Kind of agent, guessed from its id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    ClaudeCode,
    GeminiCli,
    GeminiMemory,
    GeminiCodeAssist,
    #[serde(other)]
    Unknown,
}

impl AgentType {
    pub fn from_agent_id(agent_id: &str) -> Self {
        let id = agent_id.to_lowercase();
        if id.contains("claude") {
            AgentType::ClaudeCode
        } else if id.contains("gemini-cli") {
            AgentType::GeminiCli
        } else if id.contains("gemini-memory") {
            AgentType::GeminiMemory
        } else if id.contains("gemini-code") {
            AgentType::GeminiCodeAssist
        } else {
            AgentType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "claude-code",
            AgentType::GeminiCli => "gemini-cli",
            AgentType::GeminiMemory => "gemini-memory",
            AgentType::GeminiCodeAssist => "gemini-code-assist",
            AgentType::Unknown => "unknown",
        }
    }

    pub fn capabilities(&self) -> Vec<String> {
        let caps: &[&str] = match self {
            AgentType::ClaudeCode => &["code_generation", "file_editing", "analysis", "documentation"],
            AgentType::GeminiCli => &["chat", "code_assistance", "analysis", "debugging"],
            AgentType::GeminiMemory => &["memory_management", "context_extraction", "search", "persistence"],
            AgentType::GeminiCodeAssist => &["code_completion", "suggestion", "refactoring", "optimization"],
            AgentType::Unknown => &["general"],
        };
        caps.iter().map(|c| c.to_string()).collect()
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's registry record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub process_id: Option<u32>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl AgentRegistration {
    /// Fresh, active registration for an agent starting now.
    pub fn new(agent_id: &str, devenviro_root: &Path) -> Self {
        let agent_type = AgentType::from_agent_id(agent_id);
        let now = Utc::now();

        let mut metadata = Map::new();
        metadata.insert("startup_time".to_string(), Value::String(now.to_rfc3339()));
        metadata.insert(
            "devenviro_root".to_string(),
            Value::String(devenviro_root.display().to_string()),
        );

        Self {
            agent_id: agent_id.to_string(),
            agent_type,
            capabilities: agent_type.capabilities(),
            status: AgentStatus::Active,
            last_heartbeat: now,
            process_id: Some(std::process::id()),
            version: default_version(),
            metadata,
        }
    }

    /// Whether the last heartbeat is within `timeout` of `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (now - self.last_heartbeat).to_std() {
            Ok(age) => age < timeout,
            // Heartbeat in the future (clock skew between processes)
            Err(_) => true,
        }
    }
}

/// Handle on the registry file.
///
/// Mutations take a file lock and may block the calling thread for up to
/// the lock timeout; call them through `spawn_blocking` from async code.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    path: PathBuf,
}

impl AgentRegistry {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current registry. A missing file is an empty registry.
    ///
    /// A file that is not a JSON object is read as empty and rebuilt by the
    /// next write. Entries that do not parse are skipped.
    pub fn load(&self) -> Result<Registrations> {
        if !self.path.exists() {
            return Ok(Registrations::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(parse_registrations(&self.path, &content))
    }

    pub fn get(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        Ok(self.load()?.remove(agent_id))
    }

    /// Insert or overwrite a registration.
    pub fn register(&self, registration: AgentRegistration) -> Result<()> {
        let agent_id = registration.agent_id.clone();
        let agent_type = registration.agent_type;
        self.update(|registrations| {
            registrations.insert(registration.agent_id.clone(), registration);
        })?;
        tracing::info!("Registered agent: {} ({})", agent_id, agent_type);
        Ok(())
    }

    /// Refresh an agent's heartbeat and mark it active.
    ///
    /// Returns false if the agent is not registered.
    pub fn heartbeat(&self, agent_id: &str) -> Result<bool> {
        self.update(|registrations| match registrations.get_mut(agent_id) {
            Some(registration) => {
                registration.last_heartbeat = Utc::now();
                registration.status = AgentStatus::Active;
                true
            }
            None => false,
        })
    }

    /// Set an agent's status. Returns false if the agent is not registered.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<bool> {
        self.update(|registrations| match registrations.get_mut(agent_id) {
            Some(registration) => {
                registration.status = status;
                true
            }
            None => false,
        })
    }

    /// Agents whose heartbeat is younger than `timeout`, excluding `exclude`.
    pub fn active_agents(&self, exclude: Option<&str>, timeout: Duration) -> Result<Vec<AgentRegistration>> {
        let now = Utc::now();
        Ok(self
            .load()?
            .into_values()
            .filter(|r| exclude != Some(r.agent_id.as_str()))
            .filter(|r| r.is_active_at(now, timeout))
            .collect())
    }

    /// Read-modify-write under the registry lock.
    fn update<T>(&self, f: impl FnOnce(&mut Registrations) -> T) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        with_lock(&self.path, || {
            let mut registrations = self.load()?;
            let result = f(&mut registrations);
            write_json_atomic(&self.path, &registrations)?;
            Ok(result)
        })
    }
}

fn parse_registrations(path: &Path, content: &str) -> Registrations {
    if content.trim().is_empty() {
        return Registrations::new();
    }

    let entries: Map<String, Value> = match serde_json::from_str(content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Unreadable agent registry {}, starting empty: {}", path.display(), e);
            return Registrations::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|(agent_id, entry)| match serde_json::from_value(entry) {
            Ok(registration) => Some((agent_id, registration)),
            Err(e) => {
                tracing::warn!("Skipping malformed registration for {}: {}", agent_id, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(temp_dir: &TempDir) -> AgentRegistry {
        AgentRegistry::new(temp_dir.path().join("agents/agent_registry.json"))
    }

    #[test]
    fn test_agent_type_heuristic() {
        assert_eq!(AgentType::from_agent_id("Claude-Code-1"), AgentType::ClaudeCode);
        assert_eq!(AgentType::from_agent_id("gemini-cli"), AgentType::GeminiCli);
        assert_eq!(AgentType::from_agent_id("gemini-memory-x"), AgentType::GeminiMemory);
        assert_eq!(AgentType::from_agent_id("gemini-code-assist"), AgentType::GeminiCodeAssist);
        assert_eq!(AgentType::from_agent_id("worker-7"), AgentType::Unknown);
        assert_eq!(AgentType::Unknown.capabilities(), vec!["general".to_string()]);
    }

    #[test]
    fn test_register_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);

        registry
            .register(AgentRegistration::new("claude-code", temp_dir.path()))
            .unwrap();

        let reg = registry.get("claude-code").unwrap().unwrap();
        assert_eq!(reg.agent_type, AgentType::ClaudeCode);
        assert_eq!(reg.status, AgentStatus::Active);
        assert!(reg.capabilities.contains(&"file_editing".to_string()));
        assert!(reg.metadata.contains_key("startup_time"));
    }

    #[test]
    fn test_registrations_from_two_handles_are_kept() {
        let temp_dir = TempDir::new().unwrap();
        let a = registry(&temp_dir);
        let b = registry(&temp_dir);

        a.register(AgentRegistration::new("claude-code", temp_dir.path())).unwrap();
        b.register(AgentRegistration::new("gemini-cli", temp_dir.path())).unwrap();
        assert!(a.heartbeat("claude-code").unwrap());

        let all = a.load().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_concurrent_heartbeats_do_not_lose_agents() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let root = root.clone();
                std::thread::spawn(move || {
                    let registry = AgentRegistry::new(root.join("agents/agent_registry.json"));
                    let id = format!("worker-{}", i);
                    registry.register(AgentRegistration::new(&id, &root)).unwrap();
                    for _ in 0..5 {
                        assert!(registry.heartbeat(&id).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry(&temp_dir).load().unwrap().len(), 8);
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!registry(&temp_dir).heartbeat("ghost").unwrap());
    }

    #[test]
    fn test_active_agents_respects_timeout_and_exclusion() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);

        let mut stale = AgentRegistration::new("gemini-memory", temp_dir.path());
        stale.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        registry.register(stale).unwrap();
        registry.register(AgentRegistration::new("gemini-cli", temp_dir.path())).unwrap();
        registry.register(AgentRegistration::new("claude-code", temp_dir.path())).unwrap();

        let active = registry
            .active_agents(Some("claude-code"), Duration::from_secs(300))
            .unwrap();
        let ids: Vec<&str> = active.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["gemini-cli"]);
    }

    #[test]
    fn test_set_status() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        registry.register(AgentRegistration::new("gemini-cli", temp_dir.path())).unwrap();

        assert!(registry.set_status("gemini-cli", AgentStatus::Busy).unwrap());
        assert_eq!(registry.get("gemini-cli").unwrap().unwrap().status, AgentStatus::Busy);
    }

    #[test]
    fn test_unknown_agent_type_string_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(
            registry.path(),
            r#"{"bot": {"agent_id": "bot", "agent_type": "custom-bot", "capabilities": [],
                "status": "idle", "last_heartbeat": "2026-01-01T00:00:00Z"}}"#,
        )
        .unwrap();

        let reg = registry.get("bot").unwrap().unwrap();
        assert_eq!(reg.agent_type, AgentType::Unknown);
        assert_eq!(reg.status, AgentStatus::Idle);
    }

    #[test]
    fn test_truncated_registry_reads_empty_and_is_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), r#"{"claude-code": {"agent_id": "claude-co"#).unwrap();

        assert!(registry.load().unwrap().is_empty());

        registry
            .register(AgentRegistration::new("gemini-cli", temp_dir.path()))
            .unwrap();
        let registrations = registry.load().unwrap();
        assert_eq!(registrations.len(), 1);
        assert!(registrations.contains_key("gemini-cli"));
    }

    #[test]
    fn test_naive_heartbeat_and_malformed_entries() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(&temp_dir);
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(
            registry.path(),
            r#"{
                "gemini-cli": {
                    "agent_id": "gemini-cli",
                    "agent_type": "gemini-cli",
                    "capabilities": ["chat"],
                    "status": "active",
                    "last_heartbeat": "2026-01-05T14:03:22.120344",
                    "metadata": {"startup_time": "2026-01-05T14:00:00.000001"}
                },
                "broken": {"agent_id": "broken", "last_heartbeat": "not a time"}
            }"#,
        )
        .unwrap();

        let registrations = registry.load().unwrap();
        assert_eq!(registrations.len(), 1);
        let gemini = &registrations["gemini-cli"];
        assert_eq!(
            gemini.last_heartbeat,
            timestamp::parse("2026-01-05T14:03:22.120344").unwrap()
        );
        assert_eq!(gemini.process_id, None);

        // The valid entry survives a later write
        registry.heartbeat("gemini-cli").unwrap();
        assert!(registry.get("gemini-cli").unwrap().is_some());
    }
}
