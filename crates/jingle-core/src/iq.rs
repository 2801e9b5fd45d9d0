//! IQ envelope for Jingle payloads and the outbound-failure taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::payload::JinglePayload;
use crate::types::EndpointId;

/// Stanza id correlating an IQ request with its result or error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StanzaId(String);

impl StanzaId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StanzaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A Jingle IQ as seen by this stack, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IqRequest {
    /// Stanza id, echoed by the result or error reply.
    pub id: StanzaId,
    /// Sending endpoint.
    pub from: EndpointId,
    /// Receiving endpoint.
    pub to: EndpointId,
    /// Jingle body.
    pub payload: JinglePayload,
}

impl IqRequest {
    pub fn new(from: EndpointId, to: EndpointId, payload: JinglePayload) -> Self {
        Self {
            id: StanzaId::generate(),
            from,
            to,
            payload,
        }
    }
}

/// Defined error conditions used in IQ error replies (RFC 6120 §8.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    /// The request was malformed.
    BadRequest,
    /// The addressed session or item does not exist.
    ItemNotFound,
    /// The feature is not implemented by the recipient.
    FeatureNotImplemented,
    /// The recipient cannot process the request right now.
    ServiceUnavailable,
    /// An internal error occurred while processing.
    InternalServerError,
    /// The remote party did not answer in time.
    RemoteServerTimeout,
}

impl ErrorCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::ItemNotFound => "item-not-found",
            Self::FeatureNotImplemented => "feature-not-implemented",
            Self::ServiceUnavailable => "service-unavailable",
            Self::InternalServerError => "internal-server-error",
            Self::RemoteServerTimeout => "remote-server-timeout",
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error stanza returned in place of an IQ result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStanza {
    /// Defined condition.
    pub condition: ErrorCondition,
    /// Optional human-readable text.
    pub text: Option<String>,
}

impl ErrorStanza {
    pub fn new(condition: ErrorCondition) -> Self {
        Self {
            condition,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

impl fmt::Display for ErrorStanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition, text),
            None => write!(f, "{}", self.condition),
        }
    }
}

/// Why an outbound IQ did not produce a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IqFailure {
    /// No reply arrived within the response window.
    #[error("iq timed out")]
    Timeout,

    /// The peer answered with an error stanza.
    #[error("iq error: {0}")]
    Error(ErrorStanza),

    /// The signaling connection is gone.
    #[error("signaling disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{JingleAction, JinglePayload};
    use crate::types::SessionId;

    #[test]
    fn iq_request_generates_fresh_ids() {
        let payload = JinglePayload::new(JingleAction::SessionTerminate, SessionId::new("s1"));
        let a = IqRequest::new(EndpointId::new("a"), EndpointId::new("b"), payload.clone());
        let b = IqRequest::new(EndpointId::new("a"), EndpointId::new("b"), payload);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn failure_display_includes_condition() {
        let failure = IqFailure::Error(
            ErrorStanza::new(ErrorCondition::ItemNotFound).with_text("no such session"),
        );
        assert_eq!(failure.to_string(), "iq error: item-not-found: no such session");
        assert_eq!(IqFailure::Timeout.to_string(), "iq timed out");
    }
}
