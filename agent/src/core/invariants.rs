//! Conversation-state invariants not expressible in the type system.

use std::collections::HashSet;

use crate::core::state::ConversationState;

/// Check state invariants:
/// - No two messages share the same content
/// - Every file carries a non-empty path
///
/// Returns stable, human-readable violation messages (empty when the state is sound).
pub fn check_state_invariants(state: &ConversationState) -> Vec<String> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (idx, message) in state.messages.iter().enumerate() {
        if !seen.insert(message.content.as_str()) {
            errors.push(format!("messages[{idx}]: duplicate content"));
        }
    }

    for (idx, file) in state.files.iter().enumerate() {
        if file.path.trim().is_empty() {
            errors.push(format!("files[{idx}]: path must be non-empty"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DataformFile, Message};

    #[test]
    fn sound_state_has_no_violations() {
        let state = ConversationState {
            messages: vec![Message::human("a"), Message::agent("b")],
            files: vec![DataformFile::new("definitions/a.sqlx", "")],
            ..ConversationState::default()
        };
        assert!(check_state_invariants(&state).is_empty());
    }

    #[test]
    fn reports_duplicate_messages_and_empty_paths() {
        let state = ConversationState {
            messages: vec![Message::human("a"), Message::agent("a")],
            files: vec![DataformFile::new(" ", "select 1")],
            ..ConversationState::default()
        };
        let errors = check_state_invariants(&state);
        assert_eq!(
            errors,
            vec![
                "messages[1]: duplicate content".to_string(),
                "files[0]: path must be non-empty".to_string(),
            ]
        );
    }
}
