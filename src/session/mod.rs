//! Generation session data model and orchestration.
//!
//! A [`Session`] is one continuous generation conversation with the remote
//! service. All mutation goes through the [`Orchestrator`], which owns the
//! session value; callers read state through accessors and drive transitions
//! with intents. The async [`SessionDriver`] ties the orchestrator to a
//! [`crate::transport::SessionTransport`].

mod driver;
mod orchestrator;

pub use driver::SessionDriver;
pub use orchestrator::{Dispatch, Intent, Orchestrator, Outcome, SequenceError};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Opaque identifier assigned by the generation service on the first
/// successful start reply. Immutable once set.
pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No call issued yet; no session id exists.
    Idle,
    /// A transport call is in flight; new submissions are rejected.
    AwaitingResponse,
    /// The service interrupted generation with clarification questions.
    AwaitingAnswers,
    /// The latest call produced an artifact; further feedback is accepted.
    Ready,
    /// The latest call failed; the session remains retryable.
    Failed,
}

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    System,
}

/// One transcript entry. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Message {
    pub origin: Origin,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub(crate) fn user(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn system(text: impl Into<String>) -> Self {
        Self {
            origin: Origin::System,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A clarification question from an interrupt batch.
///
/// The wire carries no identifier, so ids are synthesized positionally
/// (`q0`, `q1`, ...) when a batch is adopted. Ids are unique within a batch
/// and key the answers collected locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    /// Suggested answers; may be empty, in which case any free text applies.
    pub options: Vec<String>,
}

/// A recorded answer to one [`Question`]. The empty string is a valid
/// recorded answer, distinct from no answer at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub question_id: String,
    pub value: String,
}

/// The generated game payload. Opaque and untrusted; it is never parsed or
/// executed outside the sandbox.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub source_markup: String,
    pub generated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(source_markup: impl Into<String>) -> Self {
        Self {
            source_markup: source_markup.into(),
            generated_at: Utc::now(),
        }
    }
}

/// Answers collected for the current interrupt batch, keyed by question id.
/// Recording the same id twice overwrites the earlier value.
#[derive(Debug, Clone, Default)]
pub struct AnswerSheet {
    values: HashMap<String, String>,
}

impl AnswerSheet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, question_id: impl Into<String>, value: impl Into<String>) {
        self.values.insert(question_id.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, question_id: &str) -> Option<&str> {
        self.values.get(question_id).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ids from `questions` that have no recorded answer yet.
    #[must_use]
    pub fn missing<'a>(&self, questions: &'a [Question]) -> Vec<&'a str> {
        questions
            .iter()
            .filter(|q| !self.values.contains_key(&q.id))
            .map(|q| q.id.as_str())
            .collect()
    }

    /// Resolve answers in question order. Returns `None` if any question
    /// lacks a recorded answer.
    #[must_use]
    pub fn resolve(&self, questions: &[Question]) -> Option<Vec<Answer>> {
        questions
            .iter()
            .map(|q| {
                self.values.get(&q.id).map(|value| Answer {
                    question_id: q.id.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }
}

/// Arcade knobs folded into the first prompt, matching the product's
/// customization controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationParams {
    pub weapon: Option<String>,
    pub vibe: Option<String>,
    pub target: Option<String>,
}

impl GenerationParams {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weapon.is_none() && self.vibe.is_none() && self.target.is_none()
    }

    /// Compose the full start prompt from the user's idea and the selected
    /// knobs. With no knobs set, the idea passes through unchanged.
    #[must_use]
    pub fn compose(&self, idea: &str) -> String {
        if self.is_empty() {
            return idea.to_string();
        }
        let mut prompt = format!("{idea}\nGame should have:\n");
        if let Some(weapon) = &self.weapon {
            prompt.push_str(&format!("- Weapon: {weapon}\n"));
        }
        if let Some(vibe) = &self.vibe {
            prompt.push_str(&format!("- Background vibe: {vibe}\n"));
        }
        if let Some(target) = &self.target {
            prompt.push_str(&format!("- Target type: {target}\n"));
        }
        prompt.push_str("- Style: Cartoonish, colorful, fun arcade vibe.\n");
        prompt
    }
}

/// One continuous generation conversation.
///
/// Invariants, maintained by the orchestrator:
/// - `id` is set if and only if `state != Idle`
/// - `history` is append-only and never reordered
/// - `pending_questions` is non-empty only while `state == AwaitingAnswers`
#[derive(Debug)]
pub struct Session {
    pub(crate) id: Option<SessionId>,
    pub(crate) state: SessionState,
    pub(crate) history: Vec<Message>,
    pub(crate) pending_questions: Vec<Question>,
    pub(crate) artifact: Option<Artifact>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: None,
            state: SessionState::Idle,
            history: Vec::new(),
            pending_questions: Vec::new(),
            artifact: None,
        }
    }
}

impl Session {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    #[must_use]
    pub fn pending_questions(&self) -> &[Question] {
        &self.pending_questions
    }

    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("prompt for {id}"),
            options: Vec::new(),
        }
    }

    #[test]
    fn test_answer_sheet_missing() {
        let questions = vec![question("q0"), question("q1")];
        let mut sheet = AnswerSheet::new();
        assert_eq!(sheet.missing(&questions), vec!["q0", "q1"]);

        sheet.record("q1", "laser");
        assert_eq!(sheet.missing(&questions), vec!["q0"]);

        // Empty string counts as a recorded answer.
        sheet.record("q0", "");
        assert!(sheet.missing(&questions).is_empty());
    }

    #[test]
    fn test_answer_sheet_resolve_preserves_question_order() {
        let questions = vec![question("q0"), question("q1")];
        let mut sheet = AnswerSheet::new();
        sheet.record("q1", "second");
        sheet.record("q0", "first");

        let answers = sheet.resolve(&questions).unwrap();
        assert_eq!(answers[0].question_id, "q0");
        assert_eq!(answers[0].value, "first");
        assert_eq!(answers[1].question_id, "q1");
        assert_eq!(answers[1].value, "second");
    }

    #[test]
    fn test_answer_sheet_resolve_incomplete() {
        let questions = vec![question("q0"), question("q1")];
        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "only one");
        assert!(sheet.resolve(&questions).is_none());
    }

    #[test]
    fn test_answer_sheet_overwrite() {
        let mut sheet = AnswerSheet::new();
        sheet.record("q0", "Laser");
        sheet.record("q0", "Bullet");
        assert_eq!(sheet.get("q0"), Some("Bullet"));
        assert_eq!(sheet.len(), 1);
    }

    #[test]
    fn test_params_compose_all_knobs() {
        let params = GenerationParams {
            weapon: Some("Laser".into()),
            vibe: Some("Cyberpunk".into()),
            target: Some("Bottle".into()),
        };
        let prompt = params.compose("A cat flying through pipes");
        assert!(prompt.starts_with("A cat flying through pipes\nGame should have:\n"));
        assert!(prompt.contains("- Weapon: Laser\n"));
        assert!(prompt.contains("- Background vibe: Cyberpunk\n"));
        assert!(prompt.contains("- Target type: Bottle\n"));
        assert!(prompt.ends_with("- Style: Cartoonish, colorful, fun arcade vibe.\n"));
    }

    #[test]
    fn test_params_compose_empty_passthrough() {
        let params = GenerationParams::default();
        assert_eq!(params.compose("just the idea"), "just the idea");
    }

    #[test]
    fn test_session_defaults() {
        let session = Session::default();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.id().is_none());
        assert!(session.history().is_empty());
        assert!(session.pending_questions().is_empty());
        assert!(session.artifact().is_none());
    }
}
