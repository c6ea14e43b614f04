//! Conversation-facing steps: taking the request, asking questions, handing back.

use anyhow::{Context, Result};
use tracing::debug;

use super::Services;
use crate::core::state::{ConversationState, NextAction, StateUpdate};
use crate::core::structured::StructuredParser;
use crate::core::types::Message;

pub(crate) const FURTHER_INPUT_PROMPT: &str =
    "Anything else you would like to build? Describe the next pipeline or change.";

/// Re-emit the user's request as the opening human message.
pub fn get_initial_user_request(
    state: &ConversationState,
    _services: &Services<'_>,
) -> Result<StateUpdate> {
    let input = state.input.trim();
    let mut update = StateUpdate {
        input: Some(input.to_string()),
        ..StateUpdate::default()
    };
    if !input.is_empty() {
        update = update.with_message(Message::human(input));
    }
    Ok(update)
}

/// Turn open questions into one numbered agent message.
pub fn ask_clarifications(
    state: &ConversationState,
    services: &Services<'_>,
) -> Result<StateUpdate> {
    let mut questions: Vec<String> = state
        .missing_information
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if questions.is_empty() {
        debug!("no recorded gaps, asking the model for questions");
        let prompt = services.prompts.ask_clarifications(&state.input, &[])?;
        let parsed = services
            .repair()
            .call_structured(&prompt, &StructuredParser::clarifications())
            .context("ask model for clarification questions")?;
        questions = parsed
            .follow_up_questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
    }

    let numbered: Vec<String> = questions
        .iter()
        .enumerate()
        .map(|(idx, q)| format!("{}. {q}", idx + 1))
        .collect();
    let message = format!(
        "I need a few more details before building the pipeline:\n{}",
        numbered.join("\n")
    );

    Ok(StateUpdate {
        missing_information: Some(questions),
        ..StateUpdate::goto(NextAction::AskForFurtherInput)
    }
    .with_message(Message::agent(message)))
}

/// Invite the next request. `next` stays on the hand-off value.
pub fn ask_for_further_input(
    _state: &ConversationState,
    _services: &Services<'_>,
) -> Result<StateUpdate> {
    Ok(StateUpdate::goto(NextAction::AskForFurtherInput)
        .with_message(Message::agent(FURTHER_INPUT_PROMPT)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fakes, ScriptedModel};

    #[test]
    fn initial_request_becomes_human_message() {
        let fakes = Fakes::default();
        let state = ConversationState {
            input: "  build an orders mart ".to_string(),
            ..ConversationState::default()
        };
        let update = get_initial_user_request(&state, &fakes.services()).expect("step");
        assert_eq!(update.input.as_deref(), Some("build an orders mart"));
        assert_eq!(
            update.messages,
            Some(vec![Message::human("build an orders mart")])
        );
        assert_eq!(update.next, None);
    }

    #[test]
    fn blank_request_emits_no_message() {
        let fakes = Fakes::default();
        let update =
            get_initial_user_request(&ConversationState::default(), &fakes.services())
                .expect("step");
        assert_eq!(update.messages, None);
    }

    #[test]
    fn recorded_questions_are_numbered_without_model_call() {
        let fakes = Fakes::default();
        let state = ConversationState {
            missing_information: vec![
                "Which dataset holds orders?".to_string(),
                "What grain should the fact table have?".to_string(),
            ],
            ..ConversationState::default()
        };
        let update = ask_clarifications(&state, &fakes.services()).expect("step");
        let messages = update.messages.expect("messages");
        assert!(messages[0].content.contains("1. Which dataset holds orders?"));
        assert!(messages[0].content.contains("2. What grain"));
        assert_eq!(update.next, Some(NextAction::AskForFurtherInput));
        assert_eq!(fakes.model.calls(), 0);
    }

    #[test]
    fn model_supplies_questions_when_none_recorded() {
        let fakes = Fakes {
            model: ScriptedModel::new([r#"{"follow_up_questions": ["Which source tables?"]}"#]),
            ..Fakes::default()
        };
        let state = ConversationState::for_request("make me a pipeline");
        let update = ask_clarifications(&state, &fakes.services()).expect("step");
        assert_eq!(
            update.missing_information,
            Some(vec!["Which source tables?".to_string()])
        );
        assert!(fakes.model.prompts()[0].contains("make me a pipeline"));
    }

    #[test]
    fn further_input_keeps_hand_off_value() {
        let fakes = Fakes::default();
        let update =
            ask_for_further_input(&ConversationState::default(), &fakes.services()).expect("step");
        assert_eq!(update.next, Some(NextAction::AskForFurtherInput));
        assert_eq!(
            update.messages,
            Some(vec![Message::agent(FURTHER_INPUT_PROMPT)])
        );
    }
}
