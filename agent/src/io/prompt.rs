//! Prompt rendering for every model call site.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::state::ConversationState;
use crate::core::types::{CompilationError, DataformFile, Message};

const STRUCTURE_REQUEST_TEMPLATE: &str = include_str!("prompts/structure_transformation_request.md");
const ASK_CLARIFICATIONS_TEMPLATE: &str = include_str!("prompts/ask_clarifications.md");
const GENERATE_PIPELINE_TEMPLATE: &str = include_str!("prompts/generate_pipeline_code.md");
const IDENTIFY_FILES_TEMPLATE: &str = include_str!("prompts/identify_dataform_files.md");
const FIX_COMPILATION_TEMPLATE: &str = include_str!("prompts/fix_compilation_errors.md");
const FIX_JSON_TEMPLATE: &str = include_str!("prompts/fix_json_parse_errors.md");
const DATAFORM_EXAMPLES_GUIDE: &str = include_str!("prompts/guides/dataform_examples.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for (name, source) in [
            ("structure_transformation_request", STRUCTURE_REQUEST_TEMPLATE),
            ("ask_clarifications", ASK_CLARIFICATIONS_TEMPLATE),
            ("generate_pipeline_code", GENERATE_PIPELINE_TEMPLATE),
            ("identify_dataform_files", IDENTIFY_FILES_TEMPLATE),
            ("fix_compilation_errors", FIX_COMPILATION_TEMPLATE),
            ("fix_json_parse_errors", FIX_JSON_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }

    /// Structure a free-text request. Earlier messages give the model the
    /// answers to previous clarification questions.
    pub fn structure_request(&self, user_request: &str, history: &[Message]) -> Result<String> {
        let history: Vec<String> = history
            .iter()
            .map(|m| format!("{}: {}", m.role.prefix(), m.content.trim()))
            .collect();
        self.render(
            "structure_transformation_request",
            context! {
                user_request => user_request.trim(),
                history => (history.len() > 1).then_some(history),
            },
        )
    }

    pub fn ask_clarifications(
        &self,
        user_request: &str,
        missing_information: &[String],
    ) -> Result<String> {
        self.render(
            "ask_clarifications",
            context! {
                user_request => user_request.trim(),
                missing_information => missing_information,
            },
        )
    }

    pub fn generate_pipeline_code(&self, state: &ConversationState) -> Result<String> {
        let optional = |json: String, empty: bool| (!empty).then_some(json);
        self.render(
            "generate_pipeline_code",
            context! {
                source_tables => pretty(&state.source_tables)?,
                target_tables => pretty(&state.target_tables)?,
                intermediate_tables => optional(
                    pretty(&state.intermediate_tables)?,
                    state.intermediate_tables.is_empty(),
                ),
                transformations => pretty(&state.transformations)?,
                data_quality_checks => optional(
                    pretty(&state.data_quality_checks)?,
                    state.data_quality_checks.is_empty(),
                ),
                guide => DATAFORM_EXAMPLES_GUIDE.trim(),
            },
        )
    }

    pub fn identify_dataform_files(&self, pipeline_code: &str) -> Result<String> {
        self.render(
            "identify_dataform_files",
            context! { pipeline_code => pipeline_code.trim() },
        )
    }

    pub fn fix_compilation_errors(
        &self,
        files: &[DataformFile],
        errors: &[CompilationError],
    ) -> Result<String> {
        self.render(
            "fix_compilation_errors",
            context! {
                files => files,
                errors => errors,
                guide => DATAFORM_EXAMPLES_GUIDE.trim(),
            },
        )
    }

    /// Repair prompt carrying the original prompt, the unusable response and why.
    pub fn fix_json_parse_errors(
        &self,
        prompt: &str,
        previous_response: &str,
        error: &str,
    ) -> Result<String> {
        self.render(
            "fix_json_parse_errors",
            context! {
                prompt => prompt.trim(),
                previous_response => previous_response.trim(),
                error => error.trim(),
            },
        )
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize prompt context")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TableSpec;
    use serde_json::json;

    #[test]
    fn structure_prompt_includes_request_and_history() {
        let engine = PromptEngine::new();
        let history = vec![
            Message::human("build a daily sales mart"),
            Message::agent("Which dataset holds orders?"),
            Message::human("raw"),
        ];
        let prompt = engine
            .structure_request("build a daily sales mart\nraw", &history)
            .expect("render");
        assert!(prompt.contains("build a daily sales mart"));
        assert!(prompt.contains("- AI: Which dataset holds orders?"));
        assert!(prompt.contains("\"follow_up_questions\""));
    }

    #[test]
    fn structure_prompt_omits_single_message_history() {
        let engine = PromptEngine::new();
        let prompt = engine
            .structure_request("load orders", &[Message::human("load orders")])
            .expect("render");
        assert!(!prompt.contains("Conversation so far"));
    }

    #[test]
    fn pipeline_prompt_renders_tables_and_guide() {
        let engine = PromptEngine::new();
        let mut state = ConversationState::for_request("orders mart");
        state.source_tables = vec![TableSpec::named("orders")];
        state.transformations = json!({"fct": "sum"}).as_object().cloned().unwrap_or_default();
        let prompt = engine.generate_pipeline_code(&state).expect("render");
        assert!(prompt.contains("\"name\": \"orders\""));
        assert!(prompt.contains("type: \"declaration\""));
        assert!(!prompt.contains("## Intermediate tables"));
        assert!(!prompt.contains("## Data quality checks"));
    }

    #[test]
    fn fix_prompt_lists_files_and_errors() {
        let engine = PromptEngine::new();
        let prompt = engine
            .fix_compilation_errors(
                &[DataformFile::new("definitions/a.sqlx", "SELECT 1;")],
                &[CompilationError {
                    message: "trailing semicolon".to_string(),
                    path: "definitions/a.sqlx".to_string(),
                    stack: String::new(),
                }],
            )
            .expect("render");
        assert!(prompt.contains("### definitions/a.sqlx"));
        assert!(prompt.contains("`definitions/a.sqlx`: trailing semicolon"));
    }

    #[test]
    fn json_repair_prompt_carries_all_parts() {
        let engine = PromptEngine::new();
        let prompt = engine
            .fix_json_parse_errors("original ask", "{broken", "response is not valid JSON")
            .expect("render");
        assert!(prompt.contains("original ask"));
        assert!(prompt.contains("{broken"));
        assert!(prompt.contains("response is not valid JSON"));
    }
}
