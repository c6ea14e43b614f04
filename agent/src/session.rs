//! Interactive Driver: the console loop around the workflow.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::state::ConversationState;
use crate::core::types::Message;
use crate::workflow::{RecoverableRoutingFault, TurnStop, Workflow};

pub const WELCOME_BANNER: &str = "Welcome to the Dataform pipeline agent!\n\
Describe the pipeline you want to build. Type 'exit' or 'quit' to leave.";
pub const REQUEST_PROMPT: &str = "Your request: ";
pub const GOODBYE: &str = "Goodbye! See you next time!";
pub const COMPLETED_NOTICE: &str = "Pipeline execution completed. Starting over...";
pub const RESTART_NOTICE: &str = "Something went wrong while handling that request. Starting over...";

/// `true` for the case-insensitive exit words.
pub fn is_exit_command(line: &str) -> bool {
    let word = line.trim();
    word.eq_ignore_ascii_case("exit") || word.eq_ignore_ascii_case("quit")
}

/// One console line for a conversational message.
pub fn format_message(message: &Message) -> String {
    format!("{}: {}", message.role.prefix(), message.content)
}

pub struct Session<'a, R, W> {
    workflow: Workflow<'a>,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Session<'a, R, W> {
    pub fn new(workflow: Workflow<'a>, input: R, output: W) -> Self {
        Self {
            workflow,
            input,
            output,
        }
    }

    /// Read requests until EOF or an exit word.
    ///
    /// Errors other than [`RecoverableRoutingFault`] end the session.
    pub fn run(&mut self) -> Result<()> {
        writeln!(self.output, "{WELCOME_BANNER}")?;
        // Request awaiting answers to clarification questions.
        let mut pending: Option<String> = None;

        loop {
            write!(self.output, "{REQUEST_PROMPT}")?;
            self.output.flush()?;

            let mut line = String::new();
            let read = self.input.read_line(&mut line).context("read user input")?;
            if read == 0 || is_exit_command(&line) {
                writeln!(self.output, "{GOODBYE}")?;
                return Ok(());
            }

            let answer = line.trim();
            let request = match pending.take() {
                Some(previous) if !answer.is_empty() => format!("{previous}\n{answer}"),
                Some(previous) => previous,
                None => answer.to_string(),
            };

            let mut write_error: Option<io::Error> = None;
            let output = &mut self.output;
            let result = self.workflow.run_turn(
                ConversationState::for_request(request.clone()),
                |event| {
                    for message in event.appended {
                        if write_error.is_some() {
                            return;
                        }
                        if let Err(err) = writeln!(output, "{}", format_message(message)) {
                            write_error = Some(err);
                        }
                    }
                },
            );
            if let Some(err) = write_error {
                return Err(err).context("write conversation output");
            }

            match result {
                Ok(outcome) => match outcome.stop {
                    TurnStop::Completed => writeln!(self.output, "{COMPLETED_NOTICE}")?,
                    TurnStop::AwaitingInput => {}
                    TurnStop::NeedsClarification => {
                        info!("keeping request for the clarification answer");
                        pending = Some(request);
                    }
                },
                Err(err) => match err.downcast_ref::<RecoverableRoutingFault>() {
                    Some(fault) => {
                        warn!(task = %fault.task, "restarting after routing fault");
                        writeln!(self.output, "{RESTART_NOTICE}")?;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::{Fakes, ScriptedModel, ScriptedWorkspace, compile_error};

    fn run_session(fakes: &Fakes, input: &str) -> (Result<()>, String) {
        let mut out = Vec::new();
        let result = {
            let mut session =
                Session::new(Workflow::new(fakes.services()), input.as_bytes(), &mut out);
            session.run()
        };
        (result, String::from_utf8_lossy(&out).into_owned())
    }

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit_command("EXIT\n"));
        assert!(is_exit_command("  Quit "));
        assert!(!is_exit_command("exit now"));
    }

    #[test]
    fn formats_messages_with_role_prefix() {
        let message = Message {
            role: Role::Agent,
            content: "hello".to_string(),
        };
        assert_eq!(format_message(&message), "AI: hello");
        assert_eq!(format_message(&Message::human("hi")), "Human: hi");
    }

    #[test]
    fn exit_ends_the_session() {
        let fakes = Fakes::default();
        let (result, out) = run_session(&fakes, "exit\n");
        result.expect("session");
        assert!(out.starts_with(WELCOME_BANNER));
        assert!(out.ends_with(&format!("{REQUEST_PROMPT}{GOODBYE}\n")));
    }

    #[test]
    fn eof_ends_the_session() {
        let fakes = Fakes::default();
        let (result, out) = run_session(&fakes, "");
        result.expect("session");
        assert!(out.contains(GOODBYE));
    }

    #[test]
    fn streams_messages_and_prompts_again() {
        let fakes = Fakes::default();
        let (result, out) = run_session(&fakes, "\nquit\n");
        result.expect("session");
        assert!(out.contains("AI: Please describe the data pipeline"));
        assert_eq!(out.matches(REQUEST_PROMPT).count(), 2);
    }

    #[test]
    fn echoes_the_request_before_agent_replies() {
        let fakes = Fakes {
            model: ScriptedModel::new([r#"{"error": "not a data pipeline"}"#]),
            ..Fakes::default()
        };
        let (result, out) = run_session(&fakes, "weather report\nexit\n");
        result.expect("session");
        let echo = out.find("Human: weather report\n").expect("echoed request");
        let reply = out
            .find("AI: I could not turn that into a pipeline: not a data pipeline")
            .expect("agent reply");
        assert!(echo < reply);
        assert_eq!(out.matches("Human: weather report").count(), 1);
    }

    #[test]
    fn clarification_answer_extends_the_previous_request() {
        let fakes = Fakes {
            model: ScriptedModel::new([
                r#"{"follow_up_questions": ["Which dataset holds orders?"]}"#,
                r#"{"error": "stop here"}"#,
            ]),
            ..Fakes::default()
        };
        let (result, out) = run_session(&fakes, "orders mart\nraw\nexit\n");
        result.expect("session");
        assert!(out.contains("1. Which dataset holds orders?"));
        let prompts = fakes.model.prompts();
        assert!(prompts[1].contains("orders mart\nraw"));
        assert!(out.contains("Human: orders mart\nraw"));
    }

    #[test]
    fn routing_fault_restarts_the_turn() {
        let fakes = Fakes {
            model: ScriptedModel::new([
                r#"{"source_tables": [{"name": "orders", "dataset": "raw", "columns": [{"name": "id"}]}]}"#,
                "code",
                r#"{"files": [{"path": "a.sqlx", "content": "x"}]}"#,
                r#"{"files": []}"#,
            ]),
            workspace: ScriptedWorkspace::new(vec![vec![compile_error("a.sqlx", "bad")]]),
            ..Fakes::default()
        };
        let (result, out) = run_session(&fakes, "orders\nexit\n");
        result.expect("session");
        assert!(out.contains(RESTART_NOTICE));
        assert!(out.contains(GOODBYE));
    }

    #[test]
    fn other_faults_end_the_session() {
        let fakes = Fakes::default();
        let (result, _) = run_session(&fakes, "orders\nexit\n");
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("scripted model has no response left"));
    }
}
