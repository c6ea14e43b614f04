//! Pipeline code generation and splitting it into Dataform files.

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::Services;
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::structured::StructuredParser;
use crate::core::types::{DataformFile, Message};

pub fn generate_code(state: &ConversationState, services: &Services<'_>) -> Result<StateUpdate> {
    let prompt = services.prompts.generate_pipeline_code(state)?;
    let code = services
        .model
        .generate(&prompt)
        .context("generate pipeline code")?;
    let code = code.trim();

    if code.is_empty() {
        warn!("model returned no pipeline code");
        return Ok(StateUpdate::goto(NextAction::AskForFurtherInput).with_message(
            Message::agent("The model returned no pipeline code. Try rephrasing the request."),
        ));
    }

    info!(bytes = code.len(), "pipeline code generated");
    Ok(StateUpdate {
        pipeline_code: Some(code.to_string()),
        ..StateUpdate::goto(NextAction::IdentifyDataformFiles)
    }
    .with_message(Message::agent("Generated the pipeline code.")))
}

pub fn identify_dataform_files(
    state: &ConversationState,
    services: &Services<'_>,
) -> Result<StateUpdate> {
    if state.pipeline_code.trim().is_empty() {
        return Ok(StateUpdate::goto(NextAction::GenerateCode));
    }

    let prompt = services
        .prompts
        .identify_dataform_files(&state.pipeline_code)?;
    let parsed = services
        .repair()
        .call_structured(&prompt, &StructuredParser::dataform_files())
        .context("identify dataform files")?;
    let files: Vec<DataformFile> = parsed
        .files
        .into_iter()
        .filter(|file| !file.path.trim().is_empty())
        .collect();

    if files.is_empty() {
        return Ok(StateUpdate::goto(NextAction::AskForFurtherInput).with_message(
            Message::agent("I could not find any Dataform files in the generated code."),
        ));
    }

    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let message = format!(
        "Identified {} Dataform file(s): {}",
        files.len(),
        paths.join(", ")
    );
    Ok(StateUpdate {
        files: Some(files),
        ..StateUpdate::goto(NextAction::UploadFiles)
    }
    .with_message(Message::agent(message)))
}
