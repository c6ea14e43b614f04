//! Folding step updates into the authoritative conversation state.

use crate::core::state::{ConversationState, StateUpdate};
use crate::core::types::Message;

/// Merge `update` into a copy of `state`.
///
/// The input state is never mutated. Per-field rules:
/// - `messages`: append each message whose content matches no message already
///   present (including ones appended earlier from the same update), in order.
/// - `source_tables` / `target_tables` and every other field: replaced
///   wholesale when present in the update.
/// - `next`: overwritten whenever present, including with the terminal sentinel.
pub fn merge_update(state: &ConversationState, update: &StateUpdate) -> ConversationState {
    let mut merged = state.clone();

    if let Some(messages) = &update.messages {
        for message in messages {
            if !contains_content(&merged.messages, &message.content) {
                merged.messages.push(message.clone());
            }
        }
    }
    if let Some(tables) = &update.source_tables {
        merged.source_tables = tables.clone();
    }
    if let Some(tables) = &update.target_tables {
        merged.target_tables = tables.clone();
    }
    if let Some(next) = update.next {
        merged.next = next;
    }
    if let Some(input) = &update.input {
        merged.input = input.clone();
    }
    if let Some(tables) = &update.intermediate_tables {
        merged.intermediate_tables = tables.clone();
    }
    if let Some(transformations) = &update.transformations {
        merged.transformations = transformations.clone();
    }
    if let Some(checks) = &update.data_quality_checks {
        merged.data_quality_checks = checks.clone();
    }
    if let Some(files) = &update.files {
        merged.files = files.clone();
    }
    if let Some(code) = &update.pipeline_code {
        merged.pipeline_code = code.clone();
    }
    if let Some(results) = &update.last_compilation_results {
        merged.last_compilation_results = Some(results.clone());
    }
    if let Some(results) = &update.validation_results {
        merged.validation_results = results.clone();
    }
    if let Some(missing) = &update.missing_information {
        merged.missing_information = missing.clone();
    }

    merged
}

/// Messages present in `after` beyond the prefix shared with `before`.
///
/// Merging only appends, so the new messages are always a suffix.
pub fn appended_messages<'a>(
    before: &ConversationState,
    after: &'a ConversationState,
) -> &'a [Message] {
    let start = before.messages.len().min(after.messages.len());
    &after.messages[start..]
}

fn contains_content(messages: &[Message], content: &str) -> bool {
    messages.iter().any(|existing| existing.content == content)
}
