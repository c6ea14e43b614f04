//! Agent configuration loaded from `dataform-agent.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compile::DEFAULT_COMPILE_ATTEMPTS;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "DATAFORM_AGENT_CONFIG";
/// Configuration file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "dataform-agent.toml";

/// Agent configuration (TOML).
///
/// Missing fields default to values that work against a local Dataform CLI
/// and the `bq` tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Google Cloud project that owns the warehouse and the Dataform repository.
    pub project_id: String,
    pub location: String,
    /// Dataform repository name.
    pub repository: String,
    /// Dataform workspace that receives generated files.
    pub workspace: String,

    /// Maximum number of workflow steps per turn.
    pub step_budget: u32,

    /// Compilations attempted per upload before giving up.
    pub compile_attempts: u32,

    /// Ceiling for malformed-response repairs. Unset means retry until the
    /// model produces parseable output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_repair_max_attempts: Option<u32>,

    pub model: ModelConfig,
    pub dataform: DataformConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads a prompt on stdin and prints the response on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "gemini".to_string(),
                "--model".to_string(),
                "gemini-2.0-flash-exp".to_string(),
            ],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DataformConfig {
    /// Compile command, run inside the workspace directory.
    pub command: Vec<String>,
    /// Directory holding one sub-directory per workspace.
    pub root: PathBuf,
    /// Dataset used for `defaultDataset` in newly created workspaces.
    pub default_dataset: String,
    pub core_version: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for DataformConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "dataform".to_string(),
                "compile".to_string(),
                "--json".to_string(),
            ],
            root: PathBuf::from(".dataform-agent/workspaces"),
            default_dataset: "dataform".to_string(),
            core_version: "3.0.0".to_string(),
            timeout_secs: 5 * 60,
            output_limit_bytes: 5_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Query command; the SQL text is appended as the last argument.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "bq".to_string(),
                "query".to_string(),
                "--nouse_legacy_sql".to_string(),
                "--format=json".to_string(),
            ],
            timeout_secs: 5 * 60,
            output_limit_bytes: 5_000_000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: "us-central1".to_string(),
            repository: "agent".to_string(),
            workspace: "agent-workspace".to_string(),
            step_budget: 20,
            compile_attempts: DEFAULT_COMPILE_ATTEMPTS,
            json_repair_max_attempts: None,
            model: ModelConfig::default(),
            dataform: DataformConfig::default(),
            warehouse: WarehouseConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_budget == 0 {
            return Err(anyhow!("step_budget must be > 0"));
        }
        if self.compile_attempts == 0 {
            return Err(anyhow!("compile_attempts must be > 0"));
        }
        if self.json_repair_max_attempts == Some(0) {
            return Err(anyhow!("json_repair_max_attempts must be > 0 when set"));
        }
        if self.workspace.trim().is_empty() {
            return Err(anyhow!("workspace must be non-empty"));
        }
        validate_command("model.command", &self.model.command)?;
        validate_command("dataform.command", &self.dataform.command)?;
        validate_command("warehouse.command", &self.warehouse.command)?;
        if self.model.timeout_secs == 0
            || self.dataform.timeout_secs == 0
            || self.warehouse.timeout_secs == 0
        {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Override `project_id` from `PROJECT_ID` or `GOOGLE_CLOUD_PROJECT`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let project = lookup("PROJECT_ID")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup("GOOGLE_CLOUD_PROJECT").filter(|v| !v.trim().is_empty()));
        if let Some(project) = project {
            debug!(project = %project, "project id taken from environment");
            self.project_id = project;
        }
    }

    /// `projects/<p>/locations/<l>/repositories/<r>`.
    pub fn repository_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/repositories/{}",
            self.project_id, self.location, self.repository
        )
    }

    /// Resource name of `workspace` inside the configured repository.
    pub fn workspace_path(&self, workspace: &str) -> String {
        format!("{}/workspaces/{}", self.repository_path(), workspace)
    }
}

fn validate_command(field: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{field} must be a non-empty array"));
    }
    Ok(())
}

/// Path of the configuration file: `$DATAFORM_AGENT_CONFIG` or the default.
pub fn config_path_from_env() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, starts from `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "config file missing, using defaults");
        AgentConfig::default()
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AgentConfig::default();
        cfg.validate().expect("valid");
        assert_eq!(cfg.step_budget, 20);
        assert_eq!(cfg.compile_attempts, DEFAULT_COMPILE_ATTEMPTS);
        assert_eq!(DEFAULT_COMPILE_ATTEMPTS, 3);
        assert_eq!(cfg.json_repair_max_attempts, None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        fs::write(
            &path,
            "project_id = \"demo\"\nworkspace = \"ws\"\n\n[model]\ncommand = [\"llm\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.workspace, "ws");
        assert_eq!(cfg.model.command, vec!["llm"]);
        assert_eq!(cfg.model.timeout_secs, ModelConfig::default().timeout_secs);
        assert_eq!(cfg.dataform, DataformConfig::default());
    }

    #[test]
    fn rejects_zero_budgets_and_empty_commands() {
        let mut cfg = AgentConfig {
            step_budget: 0,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.step_budget = 20;
        cfg.json_repair_max_attempts = Some(0);
        assert!(cfg.validate().is_err());
        cfg.json_repair_max_attempts = Some(5);
        cfg.warehouse.command = vec![" ".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("warehouse.command"));
    }

    #[test]
    fn project_id_env_takes_precedence() {
        let mut cfg = AgentConfig::default();
        cfg.apply_env_overrides(|key| match key {
            "PROJECT_ID" => Some("from-project-id".to_string()),
            "GOOGLE_CLOUD_PROJECT" => Some("from-gcp".to_string()),
            _ => None,
        });
        assert_eq!(cfg.project_id, "from-project-id");

        let mut cfg = AgentConfig::default();
        cfg.apply_env_overrides(|key| (key == "GOOGLE_CLOUD_PROJECT").then(|| "gcp".to_string()));
        assert_eq!(cfg.project_id, "gcp");
    }

    #[test]
    fn renders_resource_paths() {
        let cfg = AgentConfig {
            project_id: "demo".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(
            cfg.workspace_path("ws"),
            "projects/demo/locations/us-central1/repositories/agent/workspaces/ws"
        );
    }
}
