//! The session state machine.
//!
//! The orchestrator is the single mutation point for a [`Session`]. Callers
//! request a transition and receive a [`Dispatch`] describing the transport
//! call to perform; the call's result is applied with [`Orchestrator::complete`].
//! State transitions and validation are synchronous and side-effect-free; the
//! only awaits live in the driver.
//!
//! Every dispatch carries a monotonically increasing epoch. A result whose
//! epoch no longer matches the outstanding call (the session was reset or
//! superseded in the meantime) is discarded without touching state, history,
//! or artifact.

use super::{
    AnswerSheet, Artifact, GenerationParams, Message, Question, Session, SessionId, SessionState,
};
use crate::transport::{CallError, Reply, ReplyBody, WireAnswer};
use thiserror::Error;

/// An attempted transition that is not valid from the current state. These
/// indicate caller bugs and are never shown to the end user.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("a call is already in flight for this session")]
    CallInFlight,

    #[error("nothing to submit: input is empty")]
    EmptyInput,

    #[error("pending questions must be answered before further feedback")]
    AnswersRequired,

    #[error("no pending questions to answer")]
    NoPendingQuestions,

    #[error("unanswered questions: {}", .0.join(", "))]
    MissingAnswers(Vec<String>),
}

/// The transport call the driver should perform next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Start {
        prompt: String,
    },
    Feedback {
        session_id: SessionId,
        text: String,
    },
    Resume {
        session_id: SessionId,
        answers: Vec<WireAnswer>,
    },
}

/// An accepted submission: the intent to execute, tagged with the epoch its
/// result must present to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub epoch: u64,
    pub intent: Intent,
}

/// What applying a call result did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service interrupted with clarification questions.
    Interrupted,
    /// An artifact was produced; the session is ready for feedback or saving.
    Ready,
    /// The call failed; a system message was appended and the session stays
    /// retryable.
    Errored(String),
    /// The result belonged to an abandoned or superseded call and was
    /// discarded without mutating anything.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    epoch: u64,
    resuming: bool,
}

/// Drives one [`Session`] through its lifecycle. Owns the session value;
/// at most one call is outstanding at any time.
#[derive(Debug, Default)]
pub struct Orchestrator {
    session: Session,
    epoch: u64,
    in_flight: Option<InFlight>,
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether a new submission would be accepted right now. False for the
    /// entire window between issuing a dispatch and completing it.
    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.in_flight.is_none() && self.session.state != SessionState::AwaitingResponse
    }

    /// Submit free text: the initial prompt when no session exists yet,
    /// feedback otherwise. Appends the user message to the transcript before
    /// returning the dispatch, so ordering is causal even under retry.
    pub fn submit(
        &mut self,
        text: &str,
        params: &GenerationParams,
    ) -> Result<Dispatch, SequenceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SequenceError::EmptyInput);
        }
        if !self.can_submit() {
            return Err(SequenceError::CallInFlight);
        }
        if self.session.state == SessionState::AwaitingAnswers {
            return Err(SequenceError::AnswersRequired);
        }

        let intent = match &self.session.id {
            None => Intent::Start {
                prompt: params.compose(text),
            },
            Some(id) => Intent::Feedback {
                session_id: id.clone(),
                text: text.to_string(),
            },
        };

        self.session.history.push(Message::user(text));
        self.session.state = SessionState::AwaitingResponse;
        Ok(self.issue(intent, false))
    }

    /// Submit answers to the pending interrupt batch. Rejected locally, with
    /// no dispatch, unless every question id has a recorded answer. The
    /// question batch is kept until a reply is applied, so a failed submit
    /// can be retried without losing the questions.
    pub fn submit_answers(&mut self, sheet: &AnswerSheet) -> Result<Dispatch, SequenceError> {
        if !self.can_submit() {
            return Err(SequenceError::CallInFlight);
        }
        if self.session.state != SessionState::AwaitingAnswers {
            return Err(SequenceError::NoPendingQuestions);
        }
        let Some(session_id) = self.session.id.clone() else {
            return Err(SequenceError::NoPendingQuestions);
        };

        let missing = sheet.missing(&self.session.pending_questions);
        if !missing.is_empty() {
            return Err(SequenceError::MissingAnswers(
                missing.into_iter().map(String::from).collect(),
            ));
        }

        let answers = self
            .session
            .pending_questions
            .iter()
            .map(|q| WireAnswer {
                // The service keys answers by the original question text.
                question: q.prompt.clone(),
                answer: sheet.get(&q.id).unwrap_or_default().to_string(),
            })
            .collect();

        self.session.state = SessionState::AwaitingResponse;
        Ok(self.issue(Intent::Resume {
            session_id,
            answers,
        }, true))
    }

    /// Apply the result of a previously issued dispatch. A mismatched epoch
    /// means the call was abandoned (reset or superseded); its result is
    /// discarded wholesale.
    pub fn complete(&mut self, epoch: u64, result: Result<Reply, CallError>) -> Outcome {
        let Some(call) = self.in_flight else {
            tracing::warn!(epoch, "discarding result with no call in flight");
            return Outcome::Stale;
        };
        if call.epoch != epoch {
            tracing::warn!(
                epoch,
                current = call.epoch,
                "discarding stale result from abandoned call"
            );
            return Outcome::Stale;
        }
        self.in_flight = None;

        match result {
            Ok(reply) => self.apply_reply(reply),
            Err(e) => self.apply_error(&e, call.resuming),
        }
    }

    /// Abandon the current topic: fresh session, and any in-flight call's
    /// eventual result will no longer match the epoch.
    pub fn reset(&mut self) {
        tracing::info!("session reset");
        self.session = Session::default();
        self.epoch += 1;
        self.in_flight = None;
    }

    fn issue(&mut self, intent: Intent, resuming: bool) -> Dispatch {
        self.epoch += 1;
        self.in_flight = Some(InFlight {
            epoch: self.epoch,
            resuming,
        });
        tracing::debug!(epoch = self.epoch, ?intent, "dispatch issued");
        Dispatch {
            epoch: self.epoch,
            intent,
        }
    }

    fn apply_reply(&mut self, reply: Reply) -> Outcome {
        // The id arrives on the start reply and never changes afterwards.
        if self.session.id.is_none() {
            self.session.id = reply.session_id;
        }

        match reply.body {
            ReplyBody::Interrupt { message, questions } => {
                // A second interrupt while answering replaces the batch
                // wholesale; stale answers would key against nothing.
                self.session.pending_questions = questions
                    .into_iter()
                    .enumerate()
                    .map(|(i, q)| Question {
                        id: format!("q{i}"),
                        prompt: q.prompt,
                        options: q.options,
                    })
                    .collect();
                self.session.history.push(Message::system(message));
                self.session.state = SessionState::AwaitingAnswers;
                tracing::info!(
                    questions = self.session.pending_questions.len(),
                    "generation interrupted"
                );
                Outcome::Interrupted
            }
            ReplyBody::Success { markup } => {
                self.session.artifact = Some(Artifact::new(markup));
                self.session.pending_questions.clear();
                self.session
                    .history
                    .push(Message::system("Game generated successfully. Preview updated."));
                self.session.state = SessionState::Ready;
                tracing::info!("artifact ready");
                Outcome::Ready
            }
        }
    }

    fn apply_error(&mut self, error: &CallError, resuming: bool) -> Outcome {
        let text = format!("Generation failed: {error}. Send another message to retry.");
        self.session.history.push(Message::system(text.clone()));

        // A failed resume returns to answering with the batch intact; the
        // collected answers are still valid for a retry. Anything else lands
        // in Failed, which accepts further feedback.
        if resuming && !self.session.pending_questions.is_empty() {
            self.session.state = SessionState::AwaitingAnswers;
        } else {
            self.session.state = SessionState::Failed;
        }
        tracing::warn!(%error, "call failed; session remains retryable");
        Outcome::Errored(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Origin;
    use crate::transport::{InterruptQuestion, ProtocolError, TransportError};

    fn interrupt_reply(session_id: Option<&str>, questions: Vec<(&str, Vec<&str>)>) -> Reply {
        Reply {
            session_id: session_id.map(String::from),
            body: ReplyBody::Interrupt {
                message: "Customize your game".into(),
                questions: questions
                    .into_iter()
                    .map(|(prompt, options)| InterruptQuestion {
                        prompt: prompt.into(),
                        options: options.into_iter().map(String::from).collect(),
                    })
                    .collect(),
            },
        }
    }

    fn success_reply(session_id: Option<&str>, markup: &str) -> Reply {
        Reply {
            session_id: session_id.map(String::from),
            body: ReplyBody::Success {
                markup: markup.into(),
            },
        }
    }

    #[test]
    fn test_start_transitions_to_awaiting_response() {
        let mut orch = Orchestrator::new();
        assert!(orch.can_submit());

        let dispatch = orch
            .submit("a cat flappy-bird game", &GenerationParams::default())
            .unwrap();
        assert_eq!(
            dispatch.intent,
            Intent::Start {
                prompt: "a cat flappy-bird game".into()
            }
        );
        assert_eq!(orch.session().state(), SessionState::AwaitingResponse);
        assert!(!orch.can_submit());
        assert_eq!(orch.session().history().len(), 1);
        assert_eq!(orch.session().history()[0].origin, Origin::User);
        // No id until the service assigns one.
        assert!(orch.session().id().is_none());
    }

    #[test]
    fn test_scenario_a_interrupt_answer_success() {
        let mut orch = Orchestrator::new();

        let d1 = orch
            .submit("a cat flappy-bird game", &GenerationParams::default())
            .unwrap();
        let outcome = orch.complete(
            d1.epoch,
            Ok(interrupt_reply(
                Some("s-1"),
                vec![("Which projectile?", vec!["Laser", "Bullet"])],
            )),
        );
        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(orch.session().state(), SessionState::AwaitingAnswers);
        assert_eq!(orch.session().id(), Some("s-1"));
        assert_eq!(orch.session().pending_questions().len(), 1);
        assert_eq!(orch.session().pending_questions()[0].id, "q0");

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "Laser");
        let d2 = orch.submit_answers(&sheet).unwrap();
        let Intent::Resume {
            session_id,
            answers,
        } = &d2.intent
        else {
            panic!("expected resume intent");
        };
        assert_eq!(session_id, "s-1");
        assert_eq!(answers[0].question, "Which projectile?");
        assert_eq!(answers[0].answer, "Laser");

        let outcome = orch.complete(d2.epoch, Ok(success_reply(None, "<html>...</html>")));
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(orch.session().state(), SessionState::Ready);
        assert_eq!(
            orch.session().artifact().unwrap().source_markup,
            "<html>...</html>"
        );
        assert!(orch.session().pending_questions().is_empty());

        // Exactly three entries: user, system-interrupt, system-success.
        let history = orch.session().history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].origin, Origin::User);
        assert_eq!(history[1].origin, Origin::System);
        assert_eq!(history[2].origin, Origin::System);
    }

    #[test]
    fn test_scenario_b_timeout_leaves_session_restartable() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("an idea", &GenerationParams::default()).unwrap();
        let outcome = orch.complete(d.epoch, Err(TransportError::Timeout.into()));
        assert!(matches!(outcome, Outcome::Errored(_)));
        assert_eq!(orch.session().state(), SessionState::Failed);
        assert!(orch.session().id().is_none());

        // The same prompt is permitted again and is a fresh start call.
        let d2 = orch.submit("an idea", &GenerationParams::default()).unwrap();
        assert!(matches!(d2.intent, Intent::Start { .. }));
        assert!(d2.epoch > d.epoch);
    }

    #[test]
    fn test_scenario_c_submit_while_in_flight_rejected() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("first", &GenerationParams::default()).unwrap();

        assert!(!orch.can_submit());
        assert_eq!(
            orch.submit("second", &GenerationParams::default()),
            Err(SequenceError::CallInFlight)
        );
        // The rejected submission left no trace in the transcript.
        assert_eq!(orch.session().history().len(), 1);

        orch.complete(d.epoch, Ok(success_reply(Some("s-2"), "<html/>")));
        assert!(orch.can_submit());
        let d2 = orch.submit("make it harder", &GenerationParams::default()).unwrap();
        assert!(matches!(d2.intent, Intent::Feedback { .. }));
    }

    #[test]
    fn test_scenario_d_partial_answers_rejected_locally() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(
            d.epoch,
            Ok(interrupt_reply(
                Some("s-3"),
                vec![("one?", vec![]), ("two?", vec![])],
            )),
        );

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "answered");
        assert_eq!(
            orch.submit_answers(&sheet),
            Err(SequenceError::MissingAnswers(vec!["q1".into()]))
        );
        // No dispatch was issued; the batch and state are untouched.
        assert_eq!(orch.session().state(), SessionState::AwaitingAnswers);
        assert_eq!(orch.session().pending_questions().len(), 2);
    }

    #[test]
    fn test_empty_string_answer_is_recorded_answer() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(
            d.epoch,
            Ok(interrupt_reply(Some("s-4"), vec![("hero name?", vec![])])),
        );

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "");
        let d2 = orch.submit_answers(&sheet).unwrap();
        let Intent::Resume { answers, .. } = &d2.intent else {
            panic!("expected resume intent");
        };
        assert_eq!(answers[0].answer, "");
    }

    #[test]
    fn test_stale_epoch_discarded_without_mutation() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.reset();

        let outcome = orch.complete(d.epoch, Ok(success_reply(Some("s-5"), "<html/>")));
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(orch.session().state(), SessionState::Idle);
        assert!(orch.session().id().is_none());
        assert!(orch.session().history().is_empty());
        assert!(orch.session().artifact().is_none());
    }

    #[test]
    fn test_stale_error_discarded_too() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.reset();
        let d2 = orch.submit("new topic", &GenerationParams::default()).unwrap();

        // The abandoned call's failure must not touch the new attempt.
        let outcome = orch.complete(d.epoch, Err(TransportError::Timeout.into()));
        assert_eq!(outcome, Outcome::Stale);
        assert_eq!(orch.session().state(), SessionState::AwaitingResponse);

        orch.complete(d2.epoch, Ok(success_reply(Some("s-6"), "<html/>")));
        assert_eq!(orch.session().state(), SessionState::Ready);
    }

    #[test]
    fn test_history_only_grows_in_causal_order() {
        let mut orch = Orchestrator::new();
        let mut lengths = vec![orch.session().history().len()];

        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        lengths.push(orch.session().history().len());
        orch.complete(d.epoch, Ok(interrupt_reply(Some("s-7"), vec![("q?", vec![])])));
        lengths.push(orch.session().history().len());

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "a");
        let d2 = orch.submit_answers(&sheet).unwrap();
        orch.complete(d2.epoch, Err(ProtocolError("garbage".into()).into()));
        lengths.push(orch.session().history().len());

        let d3 = orch.submit_answers(&sheet).unwrap();
        orch.complete(d3.epoch, Ok(success_reply(None, "<html/>")));
        lengths.push(orch.session().history().len());

        assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
        // user, interrupt, error, success
        assert_eq!(*lengths.last().unwrap(), 4);
    }

    #[test]
    fn test_failed_resume_keeps_questions_for_retry() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(
            d.epoch,
            Ok(interrupt_reply(Some("s-8"), vec![("pick one", vec!["a", "b"])])),
        );

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "a");
        let d2 = orch.submit_answers(&sheet).unwrap();
        orch.complete(d2.epoch, Err(TransportError::Timeout.into()));

        // Back to answering with the batch intact; the retry succeeds.
        assert_eq!(orch.session().state(), SessionState::AwaitingAnswers);
        assert_eq!(orch.session().pending_questions().len(), 1);
        let d3 = orch.submit_answers(&sheet).unwrap();
        orch.complete(d3.epoch, Ok(success_reply(None, "<html/>")));
        assert_eq!(orch.session().state(), SessionState::Ready);
    }

    #[test]
    fn test_failed_start_then_feedback_after_success() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(d.epoch, Ok(success_reply(Some("s-9"), "<html>v1</html>")));

        let d2 = orch.submit("make it harder", &GenerationParams::default()).unwrap();
        let Intent::Feedback { session_id, text } = &d2.intent else {
            panic!("expected feedback intent");
        };
        assert_eq!(session_id, "s-9");
        assert_eq!(text, "make it harder");

        orch.complete(d2.epoch, Ok(success_reply(None, "<html>v2</html>")));
        assert_eq!(
            orch.session().artifact().unwrap().source_markup,
            "<html>v2</html>"
        );
    }

    #[test]
    fn test_second_interrupt_replaces_batch_wholesale() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(
            d.epoch,
            Ok(interrupt_reply(Some("s-10"), vec![("first?", vec![]), ("second?", vec![])])),
        );

        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "x");
        sheet.record("q1", "y");
        let d2 = orch.submit_answers(&sheet).unwrap();
        orch.complete(
            d2.epoch,
            Ok(interrupt_reply(None, vec![("a different question?", vec![])])),
        );

        assert_eq!(orch.session().state(), SessionState::AwaitingAnswers);
        let questions = orch.session().pending_questions();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].prompt, "a different question?");
        assert_eq!(questions[0].id, "q0");
    }

    #[test]
    fn test_session_id_immutable_once_assigned() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(d.epoch, Ok(success_reply(Some("s-first"), "<html/>")));

        let d2 = orch.submit("more", &GenerationParams::default()).unwrap();
        orch.complete(d2.epoch, Ok(success_reply(Some("s-other"), "<html/>")));
        assert_eq!(orch.session().id(), Some("s-first"));
    }

    #[test]
    fn test_free_text_rejected_while_awaiting_answers() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        orch.complete(d.epoch, Ok(interrupt_reply(Some("s-11"), vec![("q?", vec![])])));

        assert_eq!(
            orch.submit("ignore the questions", &GenerationParams::default()),
            Err(SequenceError::AnswersRequired)
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        let mut orch = Orchestrator::new();
        assert_eq!(
            orch.submit("   ", &GenerationParams::default()),
            Err(SequenceError::EmptyInput)
        );
        assert!(orch.session().history().is_empty());
    }

    #[test]
    fn test_answers_without_pending_questions_rejected() {
        let mut orch = Orchestrator::new();
        assert_eq!(
            orch.submit_answers(&AnswerSheet::new()),
            Err(SequenceError::NoPendingQuestions)
        );
    }

    #[test]
    fn test_protocol_error_recovers_to_failed() {
        let mut orch = Orchestrator::new();
        let d = orch.submit("idea", &GenerationParams::default()).unwrap();
        let outcome = orch.complete(
            d.epoch,
            Err(ProtocolError("unknown reply type: \"progress\"".into()).into()),
        );
        assert!(matches!(outcome, Outcome::Errored(_)));
        assert_eq!(orch.session().state(), SessionState::Failed);
        // History kept: the user message plus one error notification.
        assert_eq!(orch.session().history().len(), 2);
    }

    #[test]
    fn test_start_prompt_carries_generation_params() {
        let mut orch = Orchestrator::new();
        let params = GenerationParams {
            weapon: Some("Laser".into()),
            vibe: None,
            target: None,
        };
        let d = orch.submit("pong but angry", &params).unwrap();
        let Intent::Start { prompt } = &d.intent else {
            panic!("expected start intent");
        };
        assert!(prompt.contains("- Weapon: Laser"));
        // The transcript records what the user typed, not the composed prompt.
        assert_eq!(orch.session().history()[0].text, "pong but angry");
    }
}
