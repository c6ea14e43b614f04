//! Task steps: `(state, services) -> partial update`.
//!
//! Steps never mutate the state they are given. They return only the fields
//! they intend to change and let the workflow merge the update.

mod codegen;
mod elicit;
mod request;
mod upload;
mod validate;

use anyhow::Result;

use crate::core::router::TaskName;
use crate::core::state::{ConversationState, StateUpdate};
use crate::io::config::AgentConfig;
use crate::io::dataform::Workspace;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::io::warehouse::Warehouse;
use crate::repair::{RepairPolicy, ResponseRepair};

pub use codegen::{generate_code, identify_dataform_files};
pub use elicit::elicit_schema;
pub use request::{ask_clarifications, ask_for_further_input, get_initial_user_request};
pub use upload::upload_files;
pub use validate::validate_data;

/// External capabilities injected into every step.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub model: &'a dyn Model,
    pub workspace: &'a dyn Workspace,
    pub warehouse: &'a dyn Warehouse,
    pub prompts: &'a PromptEngine,
    pub config: &'a AgentConfig,
}

impl<'a> Services<'a> {
    /// Response Repair Loop over the injected model, honoring the configured ceiling.
    pub fn repair(&self) -> ResponseRepair<'a> {
        ResponseRepair::new(
            self.model,
            self.prompts,
            RepairPolicy {
                max_attempts: self.config.json_repair_max_attempts,
            },
        )
    }
}

pub type StepFn = fn(&ConversationState, &Services<'_>) -> Result<StateUpdate>;

/// The step implementing `task`, if any.
///
/// `fix_errors` and `handle_errors` are routable but have no step.
pub fn step_for(task: TaskName) -> Option<StepFn> {
    let step: StepFn = match task {
        TaskName::GetInitialUserRequest => get_initial_user_request,
        TaskName::ElicitSchema => elicit_schema,
        TaskName::GenerateCode => generate_code,
        TaskName::IdentifyDataformFiles => identify_dataform_files,
        TaskName::UploadFiles => upload_files,
        TaskName::AskClarifications => ask_clarifications,
        TaskName::AskForFurtherInput => ask_for_further_input,
        TaskName::ValidateData => validate_data,
        TaskName::FixErrors | TaskName::HandleErrors => return None,
    };
    Some(step)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tasks_have_no_step() {
        assert!(step_for(TaskName::FixErrors).is_none());
        assert!(step_for(TaskName::HandleErrors).is_none());
        assert!(step_for(TaskName::UploadFiles).is_some());
        assert!(step_for(TaskName::ValidateData).is_some());
    }
}
