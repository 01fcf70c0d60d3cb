//! HTTP+JSON implementation of the session transport.

use super::{
    CallError, InterruptQuestion, ProtocolError, Reply, ReplyBody, SessionTransport,
    TransportError, WireAnswer,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Connection timeout, separate from the caller-supplied request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StartRequest<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    session_id: &'a str,
    feedback: &'a str,
}

#[derive(Serialize)]
struct ResumeRequest<'a> {
    session_id: &'a str,
    answers: &'a [WireAnswer],
}

/// Raw reply as the service sends it; normalized before leaving this module.
#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    message: Option<String>,
    questions: Option<Vec<RawQuestion>>,
    html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: String,
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WakeReply {
    message: String,
}

/// Thin request/response client for the generation service.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport against `base_url` with a per-call `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, CallError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "posting to generation service");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let text = response.text().await.map_err(classify)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        serde_json::from_str(&text)
            .map_err(|e| ProtocolError(format!("failed to parse body: {e}")).into())
    }

    /// Health ping. The hosted service sleeps when idle; this wakes it and
    /// returns its greeting.
    pub async fn wake(&self) -> Result<String, CallError> {
        let url = format!("{}/", self.base_url);
        let response = self.client.get(&url).send().await.map_err(classify)?;

        let status = response.status();
        let text = response.text().await.map_err(classify)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            }
            .into());
        }

        let reply: WakeReply = serde_json::from_str(&text)
            .map_err(|e| ProtocolError(format!("failed to parse body: {e}")))?;
        Ok(reply.message)
    }
}

#[async_trait]
impl SessionTransport for HttpTransport {
    async fn start(&self, prompt: &str) -> Result<Reply, CallError> {
        let raw: RawReply = self.post_json("/api/start", &StartRequest { prompt }).await?;
        normalize(raw)
    }

    async fn feedback(&self, session_id: &str, text: &str) -> Result<Reply, CallError> {
        let raw: RawReply = self
            .post_json(
                "/api/feedback",
                &FeedbackRequest {
                    session_id,
                    feedback: text,
                },
            )
            .await?;
        normalize(raw)
    }

    async fn resume(&self, session_id: &str, answers: &[WireAnswer]) -> Result<Reply, CallError> {
        let raw: RawReply = self
            .post_json(
                "/api/resume",
                &ResumeRequest {
                    session_id,
                    answers,
                },
            )
            .await?;
        normalize(raw)
    }
}

fn classify(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        TransportError::Timeout.into()
    } else {
        TransportError::Request(e.to_string()).into()
    }
}

/// Normalize a raw reply into the tagged union. Anything outside the two
/// contractual shapes is a protocol error.
fn normalize(raw: RawReply) -> Result<Reply, CallError> {
    let body = match raw.kind.as_deref() {
        Some("interrupt") => {
            let questions = raw
                .questions
                .ok_or_else(|| ProtocolError("interrupt reply without questions".into()))?
                .into_iter()
                .map(|q| InterruptQuestion {
                    prompt: q.question,
                    options: q.options,
                })
                .collect();
            ReplyBody::Interrupt {
                message: raw.message.unwrap_or_default(),
                questions,
            }
        }
        Some("success") => {
            let markup = raw
                .html
                .ok_or_else(|| ProtocolError("success reply without html".into()))?;
            ReplyBody::Success { markup }
        }
        Some(other) => {
            return Err(ProtocolError(format!("unknown reply type: {other:?}")).into());
        }
        None => return Err(ProtocolError("reply without a type tag".into()).into()),
    };

    Ok(Reply {
        session_id: raw.session_id,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Reply, CallError> {
        let raw: RawReply = serde_json::from_str(json).unwrap();
        normalize(raw)
    }

    #[test]
    fn test_normalize_interrupt() {
        let reply = parse(
            r#"{
                "type": "interrupt",
                "session_id": "s-1",
                "message": "Need a few choices first",
                "questions": [
                    {"question": "Which weapon?", "options": ["Laser", "Bullet"]},
                    {"question": "Name your hero"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(reply.session_id.as_deref(), Some("s-1"));
        let ReplyBody::Interrupt { message, questions } = reply.body else {
            panic!("expected interrupt");
        };
        assert_eq!(message, "Need a few choices first");
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].prompt, "Which weapon?");
        assert_eq!(questions[0].options, vec!["Laser", "Bullet"]);
        assert!(questions[1].options.is_empty());
    }

    #[test]
    fn test_normalize_success() {
        let reply = parse(r#"{"type": "success", "html": "<html>game</html>"}"#).unwrap();
        assert!(reply.session_id.is_none());
        assert_eq!(
            reply.body,
            ReplyBody::Success {
                markup: "<html>game</html>".into()
            }
        );
    }

    #[test]
    fn test_normalize_interrupt_without_message() {
        let reply = parse(r#"{"type": "interrupt", "questions": []}"#).unwrap();
        let ReplyBody::Interrupt { message, questions } = reply.body else {
            panic!("expected interrupt");
        };
        assert!(message.is_empty());
        assert!(questions.is_empty());
    }

    #[test]
    fn test_normalize_unknown_type_is_protocol_error() {
        let err = parse(r#"{"type": "progress", "html": "x"}"#).unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
    }

    #[test]
    fn test_normalize_missing_type_is_protocol_error() {
        let err = parse(r#"{"html": "<html></html>"}"#).unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
    }

    #[test]
    fn test_normalize_success_without_html_is_protocol_error() {
        let err = parse(r#"{"type": "success"}"#).unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
    }

    #[test]
    fn test_normalize_interrupt_without_questions_is_protocol_error() {
        let err = parse(r#"{"type": "interrupt", "message": "hm"}"#).unwrap_err();
        assert!(matches!(err, CallError::Protocol(_)));
    }

    #[test]
    fn test_normalize_ignores_extra_fields() {
        let reply = parse(
            r#"{"type": "success", "html": "<p>ok</p>", "elapsed_ms": 1200, "model": "x"}"#,
        )
        .unwrap();
        assert!(matches!(reply.body, ReplyBody::Success { .. }));
    }

    #[test]
    fn test_wire_answer_serialization() {
        let answer = WireAnswer {
            question: "Which weapon?".into(),
            answer: "Laser".into(),
        };
        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"question": "Which weapon?", "answer": "Laser"})
        );
    }

    #[test]
    fn test_resume_request_shape() {
        let answers = vec![WireAnswer {
            question: "q".into(),
            answer: "a".into(),
        }];
        let req = ResumeRequest {
            session_id: "s-9",
            answers: &answers,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "session_id": "s-9",
                "answers": [{"question": "q", "answer": "a"}]
            })
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status {
            status: 503,
            body: "Service Unavailable".into(),
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
        assert_eq!(TransportError::Timeout.to_string(), "request timed out");
    }
}
