//! Upload the identified files and compile them, repairing errors on the way.

use anyhow::Result;

use super::Services;
use crate::compile::{CompilationLoop, ModelCodeFixer};
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::types::Message;

pub fn upload_files(state: &ConversationState, services: &Services<'_>) -> Result<StateUpdate> {
    if state.files.is_empty() {
        return Ok(StateUpdate::goto(NextAction::IdentifyDataformFiles));
    }

    let repair = services.repair();
    let fixer = ModelCodeFixer::new(&repair, services.prompts);
    let compilation = CompilationLoop::new(
        services.workspace,
        &fixer,
        services.config.compile_attempts,
    );

    let mut files = state.files.clone();
    let workspace_id = services.config.workspace.as_str();
    let update = match compilation.upload_and_compile(&mut files, workspace_id)? {
        Some(summary) => {
            let next = if state.data_quality_checks.is_empty() {
                NextAction::AskForFurtherInput
            } else {
                NextAction::ValidateData
            };
            let message = format!(
                "Uploaded {} file(s) to workspace '{workspace_id}' and compiled them without errors.",
                files.len()
            );
            StateUpdate {
                files: Some(files),
                last_compilation_results: Some(summary),
                ..StateUpdate::goto(next)
            }
            .with_message(Message::agent(message))
        }
        None => {
            let message = format!(
                "Compilation in workspace '{workspace_id}' still failed after {} attempt(s).",
                services.config.compile_attempts
            );
            StateUpdate {
                files: Some(files),
                ..StateUpdate::goto(NextAction::HandleErrors)
            }
            .with_message(Message::agent(message))
        }
    };
    Ok(update)
}
