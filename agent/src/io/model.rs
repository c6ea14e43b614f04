//! Generative-model abstraction.
//!
//! The [`Model`] trait decouples the workflow from the model backend. The
//! shipped backend pipes prompts into an external command (any CLI that reads
//! a prompt on stdin and prints the answer). Tests use scripted models.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::config::ModelConfig;
use crate::io::process::Tool;

/// A text-in, text-out generative model.
pub trait Model {
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Model backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandModel {
    tool: Tool,
}

impl CommandModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            tool: Tool::new(
                "model command",
                &config.command,
                config.timeout_secs,
                config.output_limit_bytes,
            ),
        }
    }
}

impl Model for CommandModel {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        info!("calling model");
        let run = self
            .tool
            .run(&[], Some(prompt.as_bytes()), None)
            .context("run model command")?;
        let response = run.complete_stdout()?;
        let text = response.trim().to_string();
        debug!(response_bytes = text.len(), "model responded");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn command_model_returns_trimmed_stdout() {
        let model = CommandModel::new(&ModelConfig {
            command: vec!["cat".to_string()],
            timeout_secs: 10,
            output_limit_bytes: 1024,
        });
        let response = model.generate("  select 1\n").expect("generate");
        assert_eq!(response, "select 1");
    }

    #[cfg(unix)]
    #[test]
    fn command_model_rejects_truncated_output() {
        let model = CommandModel::new(&ModelConfig {
            command: vec!["cat".to_string()],
            timeout_secs: 10,
            output_limit_bytes: 3,
        });
        let err = model.generate("too long").unwrap_err();
        assert!(err.to_string().contains("exceeded"));
    }

    #[test]
    fn command_model_reports_missing_program() {
        let model = CommandModel::new(&ModelConfig {
            command: vec!["definitely-not-a-model-binary".to_string()],
            timeout_secs: 10,
            output_limit_bytes: 1024,
        });
        assert!(model.generate("hi").is_err());
    }
}
