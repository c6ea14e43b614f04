//! Compilation Repair Loop: upload files, compile, and ask for fixes.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::structured::StructuredParser;
use crate::core::types::{CompilationError, CompilationSummary, DataformFile};
use crate::io::dataform::Workspace;
use crate::io::prompt::PromptEngine;
use crate::repair::ResponseRepair;

/// Compilations attempted per upload unless configured otherwise.
pub const DEFAULT_COMPILE_ATTEMPTS: u32 = 3;

/// Produces replacement files for a failing compilation.
///
/// `Ok(vec![])` means the fixer gave up.
pub trait CodeFixer {
    fn fix(&self, files: &[DataformFile], errors: &[CompilationError]) -> Result<Vec<DataformFile>>;
}

/// Fixer that asks the model through the Response Repair Loop.
pub struct ModelCodeFixer<'a> {
    repair: &'a ResponseRepair<'a>,
    prompts: &'a PromptEngine,
}

impl<'a> ModelCodeFixer<'a> {
    pub fn new(repair: &'a ResponseRepair<'a>, prompts: &'a PromptEngine) -> Self {
        Self { repair, prompts }
    }
}

impl CodeFixer for ModelCodeFixer<'_> {
    fn fix(&self, files: &[DataformFile], errors: &[CompilationError]) -> Result<Vec<DataformFile>> {
        let prompt = self.prompts.fix_compilation_errors(files, errors)?;
        let fixed = self
            .repair
            .call_structured(&prompt, &StructuredParser::dataform_files())
            .context("ask model to fix compilation errors")?;
        Ok(fixed
            .files
            .into_iter()
            .filter(|file| !file.path.trim().is_empty())
            .collect())
    }
}

pub struct CompilationLoop<'a> {
    workspace: &'a dyn Workspace,
    fixer: &'a dyn CodeFixer,
    max_attempts: u32,
}

impl<'a> CompilationLoop<'a> {
    pub fn new(workspace: &'a dyn Workspace, fixer: &'a dyn CodeFixer, max_attempts: u32) -> Self {
        Self {
            workspace,
            fixer,
            max_attempts,
        }
    }

    /// Upload `files` and compile until the workspace compiles cleanly.
    ///
    /// Returns `None` when every attempt still reports errors or when the
    /// fixer returns no files. Fixed files are merged into `files` by path.
    /// A compilation that cannot be requested at all is an error.
    #[instrument(skip_all, fields(workspace = workspace_id, files = files.len()))]
    pub fn upload_and_compile(
        &self,
        files: &mut Vec<DataformFile>,
        workspace_id: &str,
    ) -> Result<Option<CompilationSummary>> {
        self.write_all(files, workspace_id);

        for attempt in 1..=self.max_attempts {
            let response = self
                .workspace
                .compile(workspace_id)
                .with_context(|| format!("request compilation (attempt {attempt})"))?;

            if response.errors.is_empty() {
                info!(attempt, "compilation succeeded");
                return Ok(Some(CompilationSummary {
                    name: response.name,
                    workspace: response.workspace,
                    errors: Vec::new(),
                }));
            }

            warn!(
                attempt,
                errors = response.errors.len(),
                "compilation reported errors"
            );
            match self.fixer.fix(files, &response.errors) {
                Ok(fixed) if fixed.is_empty() => {
                    warn!(attempt, "no fix proposed, giving up");
                    return Ok(None);
                }
                Ok(fixed) => {
                    self.write_all(&fixed, workspace_id);
                    merge_files(files, fixed);
                }
                Err(err) => {
                    warn!(attempt, error = %format!("{err:#}"), "fixing compilation errors failed");
                }
            }
        }

        warn!(attempts = self.max_attempts, "compilation failed after all attempts");
        Ok(None)
    }

    fn write_all(&self, files: &[DataformFile], workspace_id: &str) {
        for file in files {
            if let Err(err) =
                self.workspace
                    .write_file(workspace_id, &file.path, file.content.as_bytes())
            {
                warn!(path = %file.path, error = %format!("{err:#}"), "file upload failed");
            }
        }
    }
}

/// Replace files with matching paths and append new ones, keeping order.
fn merge_files(files: &mut Vec<DataformFile>, fixed: Vec<DataformFile>) {
    for file in fixed {
        match files.iter_mut().find(|existing| existing.path == file.path) {
            Some(existing) => existing.content = file.content,
            None => files.push(file),
        }
    }
}
