//! Scripted stand-ins for the external services, for unit and integration tests.
//!
//! Each fake replays a queue of canned results in order and records what it
//! was asked. Running past the end of a script is an error, so a test that
//! makes more calls than expected fails loudly.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::compile::CodeFixer;
use crate::core::types::{CompilationError, DataformFile};
use crate::io::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use crate::io::dataform::{CompilationResponse, Workspace};
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::io::warehouse::{Row, Warehouse};
use crate::steps::Services;

/// Build a compilation error for `path`.
pub fn compile_error(path: &str, message: &str) -> CompilationError {
    CompilationError {
        message: message.to_string(),
        path: path.to_string(),
        stack: String::new(),
    }
}

/// Model that replays scripted responses.
#[derive(Default)]
pub struct ScriptedModel {
    responses: RefCell<VecDeque<Result<String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn with_results(results: Vec<Result<String>>) -> Self {
        Self {
            responses: RefCell::new(results.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Model for ScriptedModel {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted model has no response left")))
    }
}

/// A file write observed by [`ScriptedWorkspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub workspace: String,
    pub path: String,
    pub content: String,
}

/// Workspace whose compilations report scripted errors.
#[derive(Default)]
pub struct ScriptedWorkspace {
    compilations: RefCell<VecDeque<Result<Vec<CompilationError>>>>,
    failing_paths: HashSet<String>,
    writes: RefCell<Vec<RecordedWrite>>,
    compile_calls: RefCell<usize>,
}

impl ScriptedWorkspace {
    /// Each entry is the error list of one compilation (empty = success).
    pub fn new(compilations: Vec<Vec<CompilationError>>) -> Self {
        Self::with_results(compilations.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Vec<CompilationError>>>) -> Self {
        Self {
            compilations: RefCell::new(results.into()),
            ..Self::default()
        }
    }

    /// Make writes to `path` fail.
    pub fn failing_writes_to(mut self, path: &str) -> Self {
        self.failing_paths.insert(path.to_string());
        self
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.borrow().clone()
    }

    pub fn compile_calls(&self) -> usize {
        *self.compile_calls.borrow()
    }
}

impl Workspace for ScriptedWorkspace {
    fn write_file(&self, workspace_id: &str, path: &str, contents: &[u8]) -> Result<()> {
        if self.failing_paths.contains(path) {
            return Err(anyhow!("scripted write failure for {path}"));
        }
        self.writes.borrow_mut().push(RecordedWrite {
            workspace: workspace_id.to_string(),
            path: path.to_string(),
            content: String::from_utf8_lossy(contents).into_owned(),
        });
        Ok(())
    }

    fn compile(&self, workspace_id: &str) -> Result<CompilationResponse> {
        let seq = {
            let mut calls = self.compile_calls.borrow_mut();
            *calls += 1;
            *calls
        };
        let errors = self
            .compilations
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted workspace has no compilation left")))?;
        Ok(CompilationResponse {
            name: format!("compilationResults/{seq}"),
            workspace: workspace_id.to_string(),
            errors,
        })
    }
}

/// Warehouse that replays scripted result sets.
#[derive(Default)]
pub struct ScriptedWarehouse {
    results: RefCell<VecDeque<Result<Vec<Row>>>>,
    queries: RefCell<Vec<String>>,
}

impl ScriptedWarehouse {
    pub fn new(results: Vec<Result<Vec<Row>>>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            queries: RefCell::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl Warehouse for ScriptedWarehouse {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.queries.borrow_mut().push(sql.to_string());
        self.results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted warehouse has no result left")))
    }
}

/// A repair request observed by [`ScriptedFixer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub files: Vec<DataformFile>,
    pub errors: Vec<CompilationError>,
}

/// Code fixer that replays scripted replacement file sets.
#[derive(Default)]
pub struct ScriptedFixer {
    fixes: RefCell<VecDeque<Result<Vec<DataformFile>>>>,
    requests: RefCell<Vec<FixRequest>>,
}

impl ScriptedFixer {
    pub fn new(fixes: Vec<Result<Vec<DataformFile>>>) -> Self {
        Self {
            fixes: RefCell::new(fixes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FixRequest> {
        self.requests.borrow().clone()
    }
}

impl CodeFixer for ScriptedFixer {
    fn fix(&self, files: &[DataformFile], errors: &[CompilationError]) -> Result<Vec<DataformFile>> {
        self.requests.borrow_mut().push(FixRequest {
            files: files.to_vec(),
            errors: errors.to_vec(),
        });
        self.fixes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted fixer has no fix left")))
    }
}

/// Owns one scripted fake per service so tests can borrow a [`Services`].
pub struct Fakes {
    pub model: ScriptedModel,
    pub workspace: ScriptedWorkspace,
    pub warehouse: ScriptedWarehouse,
    pub prompts: PromptEngine,
    pub config: AgentConfig,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            model: ScriptedModel::default(),
            workspace: ScriptedWorkspace::default(),
            warehouse: ScriptedWarehouse::default(),
            prompts: PromptEngine::new(),
            config: AgentConfig {
                project_id: "demo".to_string(),
                workspace: "ws".to_string(),
                ..AgentConfig::default()
            },
        }
    }
}

impl Fakes {
    pub fn services(&self) -> Services<'_> {
        Services {
            model: &self.model,
            workspace: &self.workspace,
            warehouse: &self.warehouse,
            prompts: &self.prompts,
            config: &self.config,
        }
    }
}

/// Rows from a JSON array literal.
pub fn rows(value: serde_json::Value) -> Vec<Row> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(row) => Some(row),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Temporary project directory for driving the real binary.
///
/// The model is a shell script that discards the prompt and prints the
/// next numbered file from `responses/`. Compilation is a fixed command.
pub struct TempProject {
    dir: tempfile::TempDir,
    responses: usize,
}

impl TempProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("responses"))?;
        Ok(Self { dir, responses: 0 })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Queue the model's next response.
    pub fn push_response(&mut self, response: &str) -> Result<()> {
        self.responses += 1;
        let path = self
            .path()
            .join("responses")
            .join(format!("{}.txt", self.responses));
        fs::write(path, response)?;
        Ok(())
    }

    /// Number of model calls the script has served so far.
    pub fn model_calls(&self) -> usize {
        fs::read_to_string(self.path().join("model_calls"))
            .ok()
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Write `dataform-agent.toml` wired to the scripted model and return its path.
    pub fn write_config(&self, compile_output: &str) -> Result<PathBuf> {
        let root = self.path();
        let script = root.join("model.sh");
        fs::write(
            &script,
            format!(
                "cat > /dev/null\n\
                 dir='{dir}'\n\
                 n=$(cat \"$dir/model_calls\" 2>/dev/null || echo 0)\n\
                 n=$((n + 1))\n\
                 echo \"$n\" > \"$dir/model_calls\"\n\
                 cat \"$dir/responses/$n.txt\"\n",
                dir = root.display()
            ),
        )?;

        let mut config = AgentConfig {
            workspace: "ws".to_string(),
            ..AgentConfig::default()
        };
        config.model.command = vec!["sh".to_string(), script.display().to_string()];
        config.model.timeout_secs = 30;
        config.dataform.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("printf '%s' '{compile_output}'"),
        ];
        config.dataform.root = root.join("workspaces");

        let path = root.join(DEFAULT_CONFIG_PATH);
        fs::write(&path, toml::to_string(&config)?)?;
        Ok(path)
    }
}
