//! Multi-turn driver for `interview run` and `interview replay`.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::session::SessionState;
use crate::turn::{Continuation, Engine, TurnOutcome};

/// Commands that end an interactive session early.
pub const QUIT_COMMANDS: &[&str] = &["/quit", "/exit"];

/// Source of user replies.
pub trait Responder {
    /// Reply to `prompt`, or `None` to stop the interview.
    fn respond(&mut self, prompt: &str, state: &SessionState) -> Result<Option<String>>;
}

/// Replies from a fixed list, in order. Stops when the list runs out.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponder {
    answers: VecDeque<String>,
}

impl ScriptedResponder {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
        }
    }

    /// One answer per line. Blank lines and lines starting with `#` are skipped.
    pub fn from_text(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#')),
        )
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Responder for ScriptedResponder {
    fn respond(&mut self, _prompt: &str, _state: &SessionState) -> Result<Option<String>> {
        Ok(self.answers.pop_front())
    }
}

/// Reads one reply per line, writing a `> ` marker before each read.
///
/// End of input and the quit commands stop the interview.
#[derive(Debug)]
pub struct LineResponder<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineResponder<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Responder for LineResponder<R, W> {
    fn respond(&mut self, _prompt: &str, _state: &SessionState) -> Result<Option<String>> {
        write!(self.output, "> ").context("write input marker")?;
        self.output.flush().context("flush output")?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read reply")?;
        if read == 0 {
            return Ok(None);
        }
        let reply = line.trim_end_matches(['\n', '\r']);
        if QUIT_COMMANDS.contains(&reply.trim()) {
            return Ok(None);
        }
        Ok(Some(reply.to_string()))
    }
}

/// Why `run_interview` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterviewStop {
    /// The session reached the terminal stage.
    Complete,
    /// A turn recorded an error on the session.
    Error(String),
    /// The responder stopped replying.
    Quit,
    /// The turn limit was reached first.
    MaxTurns { turns: u32 },
}

#[derive(Debug, Clone)]
pub struct InterviewOutcome {
    pub state: SessionState,
    pub turns: u32,
    pub stop: InterviewStop,
}

/// Run turns until the session completes, errors, the responder stops, or
/// `max_turns` turns have run.
///
/// A turn that leaves nothing pending (for example after a forced advance)
/// is followed by a turn without user input, so no reply is wasted.
/// `on_turn` sees every turn; an error from it stops the interview.
pub fn run_interview<R, F>(
    engine: &Engine,
    mut state: SessionState,
    responder: &mut R,
    max_turns: u32,
    mut on_turn: F,
) -> Result<InterviewOutcome>
where
    R: Responder,
    F: FnMut(&TurnOutcome) -> Result<()>,
{
    // A resumed session may already be waiting on an answer.
    let mut reply = if state.pending.is_some() && state.error.is_none() {
        let prompt = state.last_assistant_message().unwrap_or_default().to_string();
        match responder.respond(&prompt, &state)? {
            Some(reply) => Some(reply),
            None => {
                return Ok(InterviewOutcome {
                    state,
                    turns: 0,
                    stop: InterviewStop::Quit,
                });
            }
        }
    } else {
        None
    };

    let mut turns = 0u32;
    loop {
        if turns >= max_turns {
            info!(turns, "turn limit reached");
            return Ok(InterviewOutcome {
                state,
                turns,
                stop: InterviewStop::MaxTurns { turns },
            });
        }

        let outcome = engine.run_turn(state, reply.take().as_deref());
        turns += 1;
        on_turn(&outcome)?;
        let continuation = outcome.continuation;
        state = outcome.state;

        if continuation == Continuation::End {
            let stop = match &state.error {
                Some(error) => InterviewStop::Error(error.clone()),
                None => InterviewStop::Complete,
            };
            debug!(turns, ?stop, "interview ended");
            return Ok(InterviewOutcome { state, turns, stop });
        }
        if state.pending.is_none() {
            continue;
        }

        let prompt = state.last_assistant_message().unwrap_or_default().to_string();
        match responder.respond(&prompt, &state)? {
            Some(text) => reply = Some(text),
            None => {
                return Ok(InterviewOutcome {
                    state,
                    turns,
                    stop: InterviewStop::Quit,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{confirm_stage, engine_with_flow, flow_of, question, questions_stage};
    use serde_json::json;
    use std::io::Cursor;

    fn two_step_engine() -> Engine {
        engine_with_flow(
            "intake",
            flow_of(
                vec![
                    questions_stage(
                        "welcome",
                        vec![
                            question("name", "Process name?", "process.name"),
                            question("owner", "Who owns it?", "process.owner"),
                        ],
                        "confirm",
                    ),
                    confirm_stage("confirm", "{{process.name}} by {{process.owner}}", "end", "welcome"),
                ],
                json!({"process": {}}),
            ),
        )
    }

    #[test]
    fn scripted_interview_completes() {
        let engine = two_step_engine();
        let state = engine.start_session("intake").expect("session");
        let mut responder = ScriptedResponder::new(["Invoice approval", "The AP team", "yes"]);
        let mut prompts = Vec::new();

        let outcome = run_interview(&engine, state, &mut responder, 20, |turn| {
            prompts.extend(turn.reply().map(str::to_string));
            Ok(())
        })
        .expect("interview");

        assert_eq!(outcome.stop, InterviewStop::Complete);
        assert_eq!(outcome.turns, 4);
        assert_eq!(
            prompts,
            vec![
                "Process name?",
                "Who owns it?",
                "Invoice approval by The AP team\n\nIs this correct?",
                "Interview complete. Thank you!",
            ]
        );
        assert_eq!(outcome.state.slots["process"]["owner"], "The AP team");
    }

    #[test]
    fn running_out_of_answers_quits() {
        let engine = two_step_engine();
        let state = engine.start_session("intake").expect("session");
        let mut responder = ScriptedResponder::new(["Invoice approval"]);
        let outcome = run_interview(&engine, state, &mut responder, 20, |_| Ok(())).expect("run");
        assert_eq!(outcome.stop, InterviewStop::Quit);
        assert_eq!(outcome.state.active_stage_id, "welcome");
    }

    #[test]
    fn turn_limit_stops_the_interview() {
        let engine = two_step_engine();
        let state = engine.start_session("intake").expect("session");
        let mut responder = ScriptedResponder::new(["a process", "someone", "yes"]);
        let outcome = run_interview(&engine, state, &mut responder, 2, |_| Ok(())).expect("run");
        assert_eq!(outcome.stop, InterviewStop::MaxTurns { turns: 2 });
    }

    #[test]
    fn resumed_session_answers_pending_question_first() {
        let engine = two_step_engine();
        let state = engine.start_session("intake").expect("session");
        let state = engine.run_turn(state, None).state;

        let mut responder = ScriptedResponder::new(["Invoice approval"]);
        let mut replies = Vec::new();
        let outcome = run_interview(&engine, state, &mut responder, 20, |turn| {
            replies.extend(turn.reply().map(str::to_string));
            Ok(())
        })
        .expect("run");
        assert_eq!(replies, vec!["Who owns it?"]);
        assert_eq!(outcome.stop, InterviewStop::Quit);
    }

    #[test]
    fn scripted_text_skips_comments_and_blank_lines() {
        let responder = ScriptedResponder::from_text("# intake answers\nInvoice approval\n\n  The AP team  \n");
        assert_eq!(responder.remaining(), 2);
    }

    #[test]
    fn line_responder_stops_on_quit_and_eof() {
        let state = SessionState::new("intake", "welcome", 50);
        let mut output = Vec::new();
        let mut responder = LineResponder::new(Cursor::new("hello\r\n/quit\n"), &mut output);
        assert_eq!(
            responder.respond("?", &state).expect("read"),
            Some("hello".to_string())
        );
        assert_eq!(responder.respond("?", &state).expect("read"), None);
        assert_eq!(responder.respond("?", &state).expect("read"), None);
        drop(responder);
        assert_eq!(output, b"> > > ");
    }
}
