//! Session transport: the three outbound calls to the generation service.
//!
//! The transport is stateless and performs no retries; retry policy belongs
//! to the caller, since a blind retry against a stateful session could
//! duplicate side effects on the remote service. Heterogeneous responses are
//! normalized into a single tagged [`Reply`].

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Connectivity-level failure: the request never produced a contractual
/// response. A timeout implies nothing about server-side session state.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// The response body matched neither the interrupt nor the success shape.
#[derive(Debug, Error)]
#[error("unexpected response shape: {0}")]
pub struct ProtocolError(pub String);

/// Everything a transport call can fail with.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A clarification question as carried by an interrupt reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptQuestion {
    pub prompt: String,
    pub options: Vec<String>,
}

/// The two contractual reply shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// Generation paused; the service needs answers before continuing.
    Interrupt {
        message: String,
        questions: Vec<InterruptQuestion>,
    },
    /// Generation finished; `markup` is the untrusted artifact source.
    Success { markup: String },
}

/// A normalized service reply. `session_id` is present on start replies and
/// ignored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub session_id: Option<String>,
    pub body: ReplyBody,
}

/// One answer as submitted on the resume call. The service keys answers by
/// the original question text.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireAnswer {
    pub question: String,
    pub answer: String,
}

/// The three request/response operations of the generation service.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Begin a new session from an initial prompt. No session id exists yet.
    async fn start(&self, prompt: &str) -> Result<Reply, CallError>;

    /// Send free-text feedback into a live session.
    async fn feedback(&self, session_id: &str, text: &str) -> Result<Reply, CallError>;

    /// Answer a pending interrupt batch and continue generation.
    async fn resume(&self, session_id: &str, answers: &[WireAnswer]) -> Result<Reply, CallError>;
}
