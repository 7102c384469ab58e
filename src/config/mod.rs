//! Orchestrator configuration
//!
//! Reads and writes `.fleet/config.yaml` for repository-specific settings and
//! merges command-line/environment overrides on top of the file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agents::AgentSdk;
use crate::error::{OrchestratorError, Result};
use crate::executor::anti_thrash::NoCommitPolicy;
use crate::fleet::{BacklogPolicy, DEFAULT_PEER_PARALLELISM};

pub const DEFAULT_STATUS_ENDPOINT: &str = "http://127.0.0.1:3420/api/tasks/status";

/// Environment variable that pins the instance id
pub const INSTANCE_ID_ENV: &str = "FLEET_INSTANCE_ID";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceConfig {
    /// Stable workstation id; falls back to `~/.fleet/instance-id`
    pub id: Option<String>,
    pub label: Option<String>,
    /// Free-form capability tags advertised to peers (e.g. `frontend`)
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FleetConfig {
    pub presence_ttl_ms: i64,
    pub refresh_interval_ms: u64,
    pub default_peer_parallelism: usize,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            presence_ttl_ms: 5 * 60 * 1000,
            refresh_interval_ms: 60 * 1000,
            default_peer_parallelism: DEFAULT_PEER_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub max_parallel: usize,
    pub poll_interval_ms: u64,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub base_branch: String,
    pub agent_timeout_ms: u64,
    pub max_retries: u32,
    pub sdk: AgentSdk,
    pub failure_cooldown_ms: i64,
    pub no_commit_base_cooldown_ms: i64,
    pub no_commit_max_cooldown_ms: i64,
    pub max_no_commit_attempts: u32,
    pub rate_limit_pause_ms: i64,
    pub shutdown_grace_ms: u64,
    pub auto_create_pr: bool,
    pub auto_merge: bool,
    pub status_endpoint: String,
    /// Where runtime state lives; defaults to `.fleet/state`
    pub state_dir: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            poll_interval_ms: 30_000,
            project_id: None,
            project_name: None,
            base_branch: "main".to_string(),
            agent_timeout_ms: 30 * 60 * 1000,
            max_retries: 2,
            sdk: AgentSdk::default(),
            failure_cooldown_ms: 5 * 60 * 1000,
            no_commit_base_cooldown_ms: 15 * 60 * 1000,
            no_commit_max_cooldown_ms: 2 * 60 * 60 * 1000,
            max_no_commit_attempts: 3,
            rate_limit_pause_ms: 5 * 60 * 1000,
            shutdown_grace_ms: 30_000,
            auto_create_pr: true,
            auto_merge: false,
            status_endpoint: DEFAULT_STATUS_ENDPOINT.to_string(),
            state_dir: None,
        }
    }
}

impl ExecutorConfig {
    pub fn no_commit_policy(&self) -> NoCommitPolicy {
        NoCommitPolicy {
            base_cooldown_ms: self.no_commit_base_cooldown_ms,
            max_cooldown_ms: self.no_commit_max_cooldown_ms,
            max_attempts: self.max_no_commit_attempts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorConfig {
    pub instance: InstanceConfig,
    pub fleet: FleetConfig,
    pub backlog: BacklogPolicy,
    pub executor: ExecutorConfig,
}

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager for a repository
    pub fn new(repo_root: &Path) -> Self {
        Self {
            config_path: crate::utils::config_path(repo_root),
        }
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found
    pub fn read(&self) -> Result<OrchestratorConfig> {
        if !self.config_path.exists() {
            return Ok(OrchestratorConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read config file: {}", e))
        })?;

        serde_yaml::from_str(&content)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn write(&self, config: &OrchestratorConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = serde_yaml::to_string(config)?;
        std::fs::write(&self.config_path, content)
            .map_err(|e| OrchestratorError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Initialize config with defaults if it doesn't exist
    pub fn initialize(&self) -> Result<OrchestratorConfig> {
        if self.exists() {
            return self.read();
        }

        let config = OrchestratorConfig::default();
        self.write(&config)?;
        Ok(config)
    }

    pub fn update<F>(&self, updater: F) -> Result<OrchestratorConfig>
    where
        F: FnOnce(&mut OrchestratorConfig),
    {
        let mut config = self.read()?;
        updater(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Command-line overrides. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub instance_id: Option<String>,
    pub max_parallel: Option<usize>,
    pub project: Option<String>,
    pub base_branch: Option<String>,
    pub sdk: Option<AgentSdk>,
    pub poll_interval_ms: Option<u64>,
    pub auto_create_pr: Option<bool>,
}

/// Merge config values with command-line/environment overrides.
///
/// Priority: CLI, then `FLEET_INSTANCE_ID`, then the file.
/// A `project` override is matched by name, which clears any file project id.
pub fn merge_overrides(
    file_config: &OrchestratorConfig,
    overrides: &ConfigOverrides,
    env_instance_id: Option<String>,
) -> OrchestratorConfig {
    let mut merged = file_config.clone();

    if let Some(id) = overrides
        .instance_id
        .clone()
        .or(env_instance_id)
        .filter(|id| !id.trim().is_empty())
    {
        merged.instance.id = Some(id.trim().to_string());
    }

    let executor = &mut merged.executor;
    if let Some(max_parallel) = overrides.max_parallel {
        executor.max_parallel = max_parallel.max(1);
    }
    if let Some(project) = &overrides.project {
        executor.project_id = None;
        executor.project_name = Some(project.clone());
    }
    if let Some(base_branch) = &overrides.base_branch {
        executor.base_branch = base_branch.clone();
    }
    if let Some(sdk) = overrides.sdk {
        executor.sdk = sdk;
    }
    if let Some(interval) = overrides.poll_interval_ms {
        executor.poll_interval_ms = interval;
    }
    if let Some(auto_create_pr) = overrides.auto_create_pr {
        executor.auto_create_pr = auto_create_pr;
    }

    merged
}

/// Instance id from config, or the persisted workstation id
pub fn resolve_instance_id(config: &OrchestratorConfig) -> Result<String> {
    if let Some(id) = config.instance.id.as_deref().filter(|id| !id.trim().is_empty()) {
        return Ok(id.trim().to_string());
    }
    crate::file_storage::load_or_create_instance_id(&crate::file_storage::get_global_fleet_dir())
        .map_err(OrchestratorError::Config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_read_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        let config = manager.read().unwrap();
        assert_eq!(config.executor.max_parallel, 3);
        assert_eq!(config.executor.max_no_commit_attempts, 3);
        assert_eq!(config.fleet.default_peer_parallelism, 6);
        assert_eq!(config.backlog.min_tasks, 6);
    }

    #[test]
    fn test_config_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        let mut config = OrchestratorConfig::default();
        config.executor.project_name = Some("Platform".to_string());
        config.instance.capabilities = vec!["frontend".to_string()];
        manager.write(&config).unwrap();

        let read_config = manager.read().unwrap();
        assert_eq!(read_config, config);
        assert!(temp_dir.path().join(".fleet").join("config.yaml").exists());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join(".fleet")).unwrap();
        std::fs::write(
            manager.path(),
            "executor:\n  maxParallel: 8\n  sdk: codex\nbacklog:\n  minTasks: 10\n",
        )
        .unwrap();

        let config = manager.read().unwrap();
        assert_eq!(config.executor.max_parallel, 8);
        assert_eq!(config.executor.sdk, AgentSdk::Codex);
        assert_eq!(config.executor.base_branch, "main");
        assert_eq!(config.backlog.min_tasks, 10);
        assert_eq!(config.backlog.max_tasks, 100);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join(".fleet")).unwrap();
        std::fs::write(manager.path(), "executor: [unclosed").unwrap();

        assert!(matches!(manager.read(), Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_config_update() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        manager.initialize().unwrap();

        let updated = manager.update(|c| c.executor.auto_merge = true).unwrap();

        assert!(updated.executor.auto_merge);
        assert!(manager.read().unwrap().executor.auto_merge);
    }

    #[test]
    fn test_merge_overrides() {
        let mut file_config = OrchestratorConfig::default();
        file_config.executor.project_id = Some("p-1".to_string());
        file_config.executor.base_branch = "develop".to_string();

        let overrides = ConfigOverrides {
            max_parallel: Some(0),
            project: Some("Platform".to_string()),
            ..Default::default()
        };
        let merged = merge_overrides(&file_config, &overrides, Some("ws-7".to_string()));

        assert_eq!(merged.executor.max_parallel, 1);
        assert_eq!(merged.executor.project_id, None);
        assert_eq!(merged.executor.project_name.as_deref(), Some("Platform"));
        assert_eq!(merged.executor.base_branch, "develop"); // from file
        assert_eq!(merged.instance.id.as_deref(), Some("ws-7"));
    }

    #[test]
    fn test_cli_instance_id_beats_env() {
        let overrides = ConfigOverrides {
            instance_id: Some("cli".to_string()),
            ..Default::default()
        };
        let merged = merge_overrides(
            &OrchestratorConfig::default(),
            &overrides,
            Some("env".to_string()),
        );
        assert_eq!(merged.instance.id.as_deref(), Some("cli"));
    }

    #[test]
    fn test_no_commit_policy_from_config() {
        let policy = ExecutorConfig::default().no_commit_policy();
        assert_eq!(policy.cooldown_for(1), 15 * 60 * 1000);
        assert_eq!(policy.max_attempts, 3);
    }
}
