//! Dataform workspace adapter: file writes and compilation.
//!
//! [`Workspace`] is the seam the compilation loop talks to. [`CliWorkspace`]
//! keeps each workspace as a local directory and compiles it with the Dataform
//! CLI (`dataform compile --json`).

use std::cell::Cell;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::core::types::CompilationError;
use crate::io::config::AgentConfig;
use crate::io::process::Tool;

const SETTINGS_FILE: &str = "workflow_settings.yaml";

/// Response of one compilation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResponse {
    /// Resource name of the compilation result.
    pub name: String,
    /// Resource name of the compiled workspace.
    pub workspace: String,
    pub errors: Vec<CompilationError>,
}

/// Remote compilation target that receives uploaded files.
pub trait Workspace {
    /// Write one file. Failures are per-file.
    fn write_file(&self, workspace_id: &str, path: &str, contents: &[u8]) -> Result<()>;
    /// Compile the workspace's current contents.
    fn compile(&self, workspace_id: &str) -> Result<CompilationResponse>;
}

/// Workspace backed by local directories and the Dataform CLI.
#[derive(Debug)]
pub struct CliWorkspace {
    root: PathBuf,
    tool: Tool,
    settings: String,
    config: AgentConfig,
    compilations: Cell<u64>,
}

impl CliWorkspace {
    pub fn new(config: &AgentConfig) -> Self {
        let dataform = &config.dataform;
        let settings = format!(
            "defaultProject: {project}\ndefaultLocation: {location}\ndefaultDataset: {dataset}\ndefaultAssertionDataset: {dataset}_assertions\ndataformCoreVersion: {version}\n",
            project = config.project_id,
            location = config.location,
            dataset = dataform.default_dataset,
            version = dataform.core_version,
        );
        Self {
            root: dataform.root.clone(),
            tool: Tool::new(
                "dataform compile",
                &dataform.command,
                dataform.timeout_secs,
                dataform.output_limit_bytes,
            ),
            settings,
            config: config.clone(),
            compilations: Cell::new(0),
        }
    }

    fn workspace_dir(&self, workspace_id: &str) -> Result<PathBuf> {
        let relative = checked_relative_path(workspace_id)?;
        Ok(self.root.join(relative))
    }

    fn ensure_settings(&self, dir: &Path) -> Result<()> {
        let settings_path = dir.join(SETTINGS_FILE);
        if settings_path.exists() {
            return Ok(());
        }
        fs::create_dir_all(dir).with_context(|| format!("create workspace {}", dir.display()))?;
        fs::write(&settings_path, &self.settings)
            .with_context(|| format!("write {}", settings_path.display()))
    }
}

impl Workspace for CliWorkspace {
    #[instrument(skip_all, fields(workspace = workspace_id, path, bytes = contents.len()))]
    fn write_file(&self, workspace_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        let dir = self.workspace_dir(workspace_id)?;
        let target = dir.join(checked_relative_path(path)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, contents).with_context(|| format!("write {}", target.display()))?;
        debug!(target = %target.display(), "file written");
        Ok(())
    }

    #[instrument(skip_all, fields(workspace = workspace_id))]
    fn compile(&self, workspace_id: &str) -> Result<CompilationResponse> {
        let dir = self.workspace_dir(workspace_id)?;
        self.ensure_settings(&dir)?;

        let run = self
            .tool
            .run(&[], None, Some(&dir))
            .context("run dataform compile")?;
        if run.timed_out {
            return Err(anyhow!(
                "dataform compile timed out after {:?}",
                self.tool.timeout()
            ));
        }

        // The CLI exits non-zero when the graph has errors but still prints it.
        let errors = match parse_compile_output(&run.stdout.text()) {
            Ok(errors) => errors,
            Err(err) => {
                run.ensure_success()?;
                return Err(err);
            }
        };

        let seq = self.compilations.get() + 1;
        self.compilations.set(seq);
        info!(errors = errors.len(), seq, "compilation finished");
        Ok(CompilationResponse {
            name: format!(
                "{}/compilationResults/{seq}",
                self.config.repository_path()
            ),
            workspace: self.config.workspace_path(workspace_id),
            errors,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CompiledGraph {
    graph_errors: GraphErrors,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GraphErrors {
    compilation_errors: Vec<RawCompilationError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCompilationError {
    file_name: String,
    message: String,
    stack: String,
}

/// Extract structural errors from `dataform compile --json` output.
pub fn parse_compile_output(stdout: &str) -> Result<Vec<CompilationError>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("dataform compile produced no output"));
    }
    let graph: CompiledGraph =
        serde_json::from_str(trimmed).context("parse dataform compile output")?;
    Ok(graph
        .graph_errors
        .compilation_errors
        .into_iter()
        .map(|raw| CompilationError {
            message: raw.message,
            path: raw.file_name,
            stack: raw.stack,
        })
        .collect())
}

/// Reject absolute paths and parent-directory traversal.
fn checked_relative_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    if path.trim().is_empty() {
        return Err(anyhow!("path must be non-empty"));
    }
    let escapes = candidate.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(anyhow!("path '{path}' must stay inside the workspace"));
    }
    Ok(candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_in(root: &Path, command: Vec<String>) -> CliWorkspace {
        let mut config = AgentConfig {
            project_id: "demo".to_string(),
            ..AgentConfig::default()
        };
        config.dataform.root = root.to_path_buf();
        config.dataform.command = command;
        config.dataform.timeout_secs = 10;
        CliWorkspace::new(&config)
    }

    #[test]
    fn parses_compilation_errors() {
        let stdout = r#"{
            "tables": [],
            "graphErrors": {"compilationErrors": [
                {"fileName": "definitions/a.sqlx", "message": "Unexpected token", "stack": "at line 3"}
            ]}
        }"#;
        let errors = parse_compile_output(stdout).expect("parse");
        assert_eq!(
            errors,
            vec![CompilationError {
                message: "Unexpected token".to_string(),
                path: "definitions/a.sqlx".to_string(),
                stack: "at line 3".to_string(),
            }]
        );
    }

    #[test]
    fn graph_without_errors_parses_as_empty() {
        let errors = parse_compile_output(r#"{"tables": [{"type": "table"}]}"#).expect("parse");
        assert!(errors.is_empty());
    }

    #[test]
    fn write_file_creates_nested_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = workspace_in(temp.path(), vec!["true".to_string()]);
        workspace
            .write_file("ws", "definitions/staging/a.sqlx", b"select 1")
            .expect("write");
        let written = fs::read_to_string(temp.path().join("ws/definitions/staging/a.sqlx"))
            .expect("read back");
        assert_eq!(written, "select 1");
    }

    #[test]
    fn write_file_rejects_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = workspace_in(temp.path(), vec!["true".to_string()]);
        assert!(workspace.write_file("ws", "../escape.sqlx", b"x").is_err());
        assert!(workspace.write_file("ws", "/etc/passwd", b"x").is_err());
        assert!(workspace.write_file("../ws", "a.sqlx", b"x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn compile_runs_command_and_writes_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = workspace_in(
            temp.path(),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"echo '{"graphErrors":{"compilationErrors":[{"fileName":"a.sqlx","message":"bad"}]}}'; exit 1"#
                    .to_string(),
            ],
        );
        let response = workspace.compile("ws").expect("compile");
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].path, "a.sqlx");
        assert!(response.name.ends_with("compilationResults/1"));
        assert!(response.workspace.ends_with("workspaces/ws"));

        let settings =
            fs::read_to_string(temp.path().join("ws").join(SETTINGS_FILE)).expect("settings");
        assert!(settings.contains("defaultProject: demo"));
    }

    #[cfg(unix)]
    #[test]
    fn compile_without_output_surfaces_command_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = workspace_in(
            temp.path(),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo boom >&2; exit 2".to_string(),
            ],
        );
        let err = workspace.compile("ws").unwrap_err();
        assert!(format!("{err:#}").contains("boom"));
    }
}
