//! Routing table selecting the next task from conversation state.

use std::fmt;

use tracing::info;

use crate::core::state::{ConversationState, NextAction};

/// Every task the workflow graph knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
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
}

impl TaskName {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskName::GetInitialUserRequest => "get_initial_user_request",
            TaskName::ElicitSchema => "elicit_schema",
            TaskName::GenerateCode => "generate_code",
            TaskName::IdentifyDataformFiles => "identify_dataform_files",
            TaskName::UploadFiles => "upload_files",
            TaskName::AskClarifications => "ask_clarifications",
            TaskName::AskForFurtherInput => "ask_for_further_input",
            TaskName::FixErrors => "fix_errors",
            TaskName::HandleErrors => "handle_errors",
            TaskName::ValidateData => "validate_data",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Task(TaskName),
    End,
}

/// Select the next task from `state.next`.
pub fn route(state: &ConversationState) -> Route {
    let decision = route_next(state.next);
    match decision {
        Route::Task(task) => info!(next = %state.next, task = %task, "routing to task"),
        Route::End => info!(next = %state.next, "ending conversation"),
    }
    decision
}

/// The fixed routing table. Values outside the table end the turn.
pub fn route_next(next: NextAction) -> Route {
    match next {
        NextAction::GenerateCode => Route::Task(TaskName::GenerateCode),
        NextAction::AskClarifications => Route::Task(TaskName::AskClarifications),
        NextAction::IdentifyDataformFiles => Route::Task(TaskName::IdentifyDataformFiles),
        NextAction::UploadFiles => Route::Task(TaskName::UploadFiles),
        NextAction::FixErrors => Route::Task(TaskName::FixErrors),
        NextAction::HandleErrors => Route::Task(TaskName::HandleErrors),
        NextAction::ValidateData => Route::Task(TaskName::ValidateData),
        NextAction::ElicitSchema => Route::Task(TaskName::ElicitSchema),
        NextAction::GetInitialUserRequest | NextAction::AskForFurtherInput | NextAction::End => {
            Route::End
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_next(next: NextAction) -> ConversationState {
        ConversationState {
            next,
            ..ConversationState::default()
        }
    }

    #[test]
    fn generate_code_routes_to_generate_code() {
        assert_eq!(
            route(&state_with_next(NextAction::GenerateCode)),
            Route::Task(TaskName::GenerateCode)
        );
    }

    #[test]
    fn every_table_entry_maps_to_itself() {
        let table = [
            (NextAction::GenerateCode, TaskName::GenerateCode),
            (NextAction::AskClarifications, TaskName::AskClarifications),
            (
                NextAction::IdentifyDataformFiles,
                TaskName::IdentifyDataformFiles,
            ),
            (NextAction::UploadFiles, TaskName::UploadFiles),
            (NextAction::FixErrors, TaskName::FixErrors),
            (NextAction::HandleErrors, TaskName::HandleErrors),
            (NextAction::ValidateData, TaskName::ValidateData),
            (NextAction::ElicitSchema, TaskName::ElicitSchema),
        ];
        for (next, task) in table {
            assert_eq!(route_next(next), Route::Task(task));
            assert_eq!(next.as_str(), task.as_str());
        }
    }

    #[test]
    fn values_outside_table_end_the_turn() {
        for next in [
            NextAction::End,
            NextAction::AskForFurtherInput,
            NextAction::GetInitialUserRequest,
        ] {
            assert_eq!(route_next(next), Route::End);
        }
    }

    #[test]
    fn unset_next_ends_the_turn() {
        assert_eq!(route(&ConversationState::default()), Route::End);
    }

    #[test]
    fn unrecognized_serialized_value_ends_the_turn() {
        let next: NextAction = serde_json::from_str("\"publish\"").expect("parse");
        assert_eq!(route_next(next), Route::End);
    }
}
