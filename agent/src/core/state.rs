//! Conversation state threaded through every workflow step.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::{
    CompilationSummary, DataformFile, Message, TableSpec, ValidationOutcome,
};

/// Name of the task a step asks to run next, or the terminal sentinel.
///
/// Any serialized value outside the closed set deserializes to [`NextAction::End`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    GetInitialUserRequest,
    ElicitSchema,
    GenerateCode,
    IdentifyDataformFiles,
    UploadFiles,
    AskClarifications,
    AskForFurtherInput,
    FixErrors,
    HandleErrors,
    ValidateData,
    #[default]
    #[serde(rename = "__end__")]
    #[serde(other)]
    End,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::GetInitialUserRequest => "get_initial_user_request",
            NextAction::ElicitSchema => "elicit_schema",
            NextAction::GenerateCode => "generate_code",
            NextAction::IdentifyDataformFiles => "identify_dataform_files",
            NextAction::UploadFiles => "upload_files",
            NextAction::AskClarifications => "ask_clarifications",
            NextAction::AskForFurtherInput => "ask_for_further_input",
            NextAction::FixErrors => "fix_errors",
            NextAction::HandleErrors => "handle_errors",
            NextAction::ValidateData => "validate_data",
            NextAction::End => "__end__",
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single mutable aggregate of one pipeline session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    /// Latest raw user utterance.
    pub input: String,
    /// Conversational timeline; merged without duplicate content.
    pub messages: Vec<Message>,
    pub next: NextAction,
    pub source_tables: Vec<TableSpec>,
    pub target_tables: Vec<TableSpec>,
    pub intermediate_tables: Vec<TableSpec>,
    pub transformations: Map<String, Value>,
    pub data_quality_checks: Map<String, Value>,
    /// Candidate pipeline source files, in upload order.
    pub files: Vec<DataformFile>,
    pub pipeline_code: String,
    pub last_compilation_results: Option<CompilationSummary>,
    pub validation_results: Vec<ValidationOutcome>,
    /// Open questions found while eliciting the schema.
    pub missing_information: Vec<String>,
}

impl ConversationState {
    /// Fresh state for a new pipeline session holding the user's request.
    ///
    /// Messages start empty; `get_initial_user_request` appends the human
    /// message so observers see it streamed like every other message.
    pub fn for_request(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }
}

/// Partial update proposed by a task step.
///
/// Only the keys a step intends to change are `Some`. Deserializing from a JSON
/// object ignores unrecognized keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tables: Option<Vec<TableSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tables: Option<Vec<TableSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermediate_tables: Option<Vec<TableSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformations: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_quality_checks: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<DataformFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_compilation_results: Option<CompilationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<Vec<ValidationOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_information: Option<Vec<String>>,
}

impl StateUpdate {
    /// Update that only sets `next`.
    pub fn goto(next: NextAction) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }

    /// Append a message to the update's message list.
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.get_or_insert_with(Vec::new).push(message);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_next_value_is_terminal() {
        let next: NextAction = serde_json::from_str("\"deploy_everything\"").expect("parse");
        assert_eq!(next, NextAction::End);
        let next: NextAction = serde_json::from_str("\"__end__\"").expect("parse");
        assert_eq!(next, NextAction::End);
    }

    #[test]
    fn known_next_values_round_trip_through_as_str() {
        for next in [
            NextAction::ElicitSchema,
            NextAction::GenerateCode,
            NextAction::UploadFiles,
            NextAction::AskForFurtherInput,
        ] {
            let parsed: NextAction =
                serde_json::from_value(Value::String(next.as_str().to_string())).expect("parse");
            assert_eq!(parsed, next);
        }
    }

    #[test]
    fn for_request_sets_input_without_messages() {
        let state = ConversationState::for_request("load orders");
        assert_eq!(state.input, "load orders");
        assert!(state.messages.is_empty());
        assert!(state.target_tables.is_empty());
        assert_eq!(state.next, NextAction::End);
    }

    #[test]
    fn for_request_with_blank_input_has_no_messages() {
        let state = ConversationState::for_request("  ");
        assert!(state.messages.is_empty());
    }

    #[test]
    fn update_ignores_unknown_keys() {
        let update: StateUpdate = serde_json::from_str(
            r#"{"next":"generate_code","confidence":0.4,"messages":[{"role":"agent","content":"ok"}]}"#,
        )
        .expect("parse update");
        assert_eq!(update.next, Some(NextAction::GenerateCode));
        assert_eq!(update.messages, Some(vec![Message::agent("ok")]));
        assert_eq!(update.files, None);
    }

    #[test]
    fn with_message_accumulates() {
        let update = StateUpdate::goto(NextAction::UploadFiles)
            .with_message(Message::agent("a"))
            .with_message(Message::agent("b"));
        assert_eq!(update.messages.map(|m| m.len()), Some(2));
    }
}
