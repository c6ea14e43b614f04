//! Workflow Engine: drive the Router and task steps through one turn.

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::invariants::check_state_invariants;
use crate::core::merge::{appended_messages, merge_update};
use crate::core::router::{Route, TaskName, route};
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::types::Message;
use crate::steps::{Services, step_for};

/// The Router selected a task that has no step.
///
/// The driver treats this as "restart the turn".
#[derive(Debug, Error)]
#[error("task '{task}' has no step; restarting the turn")]
pub struct RecoverableRoutingFault {
    pub task: TaskName,
}

/// A turn needed more steps than the configured budget.
#[derive(Debug, Error)]
#[error("step budget of {budget} exhausted before the turn finished")]
pub struct StepBudgetExceededError {
    pub budget: u32,
}

/// Why a turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStop {
    /// The Router reached the terminal sentinel.
    Completed,
    /// The "ask for further input" hand-off ran.
    AwaitingInput,
    /// The hand-off ran right after clarification questions were asked.
    NeedsClarification,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub steps_executed: u32,
    pub stop: TurnStop,
}

/// Observation of one executed step, after its update was merged.
#[derive(Debug)]
pub struct StepEvent<'s> {
    /// 1-based position of the step within the turn.
    pub index: u32,
    pub task: TaskName,
    pub update: &'s StateUpdate,
    /// Messages the merge actually appended.
    pub appended: &'s [Message],
    pub state: &'s ConversationState,
}

pub struct Workflow<'a> {
    services: Services<'a>,
    step_budget: u32,
}

impl<'a> Workflow<'a> {
    pub fn new(services: Services<'a>) -> Self {
        Self {
            step_budget: services.config.step_budget,
            services,
        }
    }

    /// Run one turn starting at `get_initial_user_request`.
    ///
    /// `on_step` sees every step as soon as its update is merged.
    pub fn run_turn<F: FnMut(&StepEvent<'_>)>(
        &self,
        initial: ConversationState,
        mut on_step: F,
    ) -> Result<TurnOutcome> {
        let mut state = initial;
        let mut task = TaskName::GetInitialUserRequest;
        let mut previous: Option<TaskName> = None;
        let mut steps_executed = 0u32;

        loop {
            let Some(step) = step_for(task) else {
                warn!(task = %task, "routed to a task without a step");
                return Err(RecoverableRoutingFault { task }.into());
            };
            if steps_executed >= self.step_budget {
                return Err(StepBudgetExceededError {
                    budget: self.step_budget,
                }
                .into());
            }
            steps_executed += 1;
            debug!(task = %task, index = steps_executed, "running step");

            let update = step(&state, &self.services).with_context(|| format!("step {task}"))?;
            let merged = merge_update(&state, &update);
            for violation in check_state_invariants(&merged) {
                warn!(task = %task, violation = %violation, "state invariant violated");
            }
            on_step(&StepEvent {
                index: steps_executed,
                task,
                update: &update,
                appended: appended_messages(&state, &merged),
                state: &merged,
            });
            state = merged;

            let decision = match task {
                TaskName::GetInitialUserRequest => Route::Task(TaskName::ElicitSchema),
                TaskName::AskForFurtherInput => {
                    let stop = if previous == Some(TaskName::AskClarifications) {
                        TurnStop::NeedsClarification
                    } else {
                        TurnStop::AwaitingInput
                    };
                    info!(steps = steps_executed, ?stop, "turn handed back to the user");
                    return Ok(TurnOutcome {
                        state,
                        steps_executed,
                        stop,
                    });
                }
                _ => route(&state),
            };
            previous = Some(task);

            task = match decision {
                Route::Task(next) => next,
                Route::End if state.next == NextAction::AskForFurtherInput => {
                    TaskName::AskForFurtherInput
                }
                Route::End => {
                    info!(steps = steps_executed, "turn completed");
                    return Ok(TurnOutcome {
                        state,
                        steps_executed,
                        stop: TurnStop::Completed,
                    });
                }
            };
        }
    }
}
