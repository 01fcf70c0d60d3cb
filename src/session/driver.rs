//! Async driver: executes orchestrator dispatches against a transport.
//!
//! The driver owns the orchestrator and is the only place a session awaits.
//! Cancelling the driver's token mid-call abandons the topic: the session is
//! reset and the in-flight call's eventual result is discarded by the epoch
//! check rather than applied to stale state.

use super::{AnswerSheet, Dispatch, GenerationParams, Intent, Orchestrator, Outcome, SequenceError, Session};
use crate::transport::SessionTransport;
use tokio_util::sync::CancellationToken;

pub struct SessionDriver<T> {
    orchestrator: Orchestrator,
    transport: T,
    cancel: CancellationToken,
}

impl<T: SessionTransport> SessionDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            orchestrator: Orchestrator::new(),
            transport,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        self.orchestrator.session()
    }

    #[must_use]
    pub fn can_submit(&self) -> bool {
        self.orchestrator.can_submit()
    }

    /// Token that abandons the session when cancelled. Clones may be handed
    /// to signal handlers or UI teardown paths.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Submit free text (initial prompt or feedback) and await the result.
    pub async fn send(
        &mut self,
        text: &str,
        params: &GenerationParams,
    ) -> Result<Outcome, SequenceError> {
        let dispatch = self.orchestrator.submit(text, params)?;
        Ok(self.execute(dispatch).await)
    }

    /// Submit a complete answer sheet for the pending interrupt batch.
    pub async fn answer(&mut self, sheet: &AnswerSheet) -> Result<Outcome, SequenceError> {
        let dispatch = self.orchestrator.submit_answers(sheet)?;
        Ok(self.execute(dispatch).await)
    }

    /// Start over on a new topic. Any in-flight call becomes stale.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.orchestrator.reset();
    }

    async fn execute(&mut self, dispatch: Dispatch) -> Outcome {
        let result = {
            let call = async {
                match &dispatch.intent {
                    Intent::Start { prompt } => self.transport.start(prompt).await,
                    Intent::Feedback { session_id, text } => {
                        self.transport.feedback(session_id, text).await
                    }
                    Intent::Resume {
                        session_id,
                        answers,
                    } => self.transport.resume(session_id, answers).await,
                }
            };
            tokio::select! {
                r = call => Some(r),
                () = self.cancel.cancelled() => None,
            }
        };

        match result {
            Some(r) => self.orchestrator.complete(dispatch.epoch, r),
            None => {
                self.cancel = CancellationToken::new();
                self.orchestrator.reset();
                Outcome::Stale
            }
        }
    }
}
