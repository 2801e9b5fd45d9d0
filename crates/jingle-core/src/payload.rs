//! Jingle payload envelope: actions, contents, and terminate reasons.
//!
//! A [`JinglePayload`] is the body of a signaling IQ. It is assembled with a
//! builder so call sites read in setter order, matching how payloads are
//! described in protocol traces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::candidate::IceTransport;
use crate::description::MediaDescription;
use crate::error::JingleError;
use crate::types::{EndpointId, SessionId};

/// Jingle actions understood by this stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JingleAction {
    /// Start a new session with a full offer.
    SessionInitiate,
    /// Answer a previously received offer.
    SessionAccept,
    /// End the session, carrying a reason.
    SessionTerminate,
    /// Deliver additional ICE candidates for an existing session.
    TransportInfo,
    /// Change the direction of an existing content.
    ContentModify,
    /// Announce sources added to the session by the remote side.
    SourceAdd,
    /// Announce sources removed from the session by the remote side.
    SourceRemove,
    /// Replace the session transport, restarting ICE.
    TransportReplace,
}

impl JingleAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionInitiate => "session-initiate",
            Self::SessionAccept => "session-accept",
            Self::SessionTerminate => "session-terminate",
            Self::TransportInfo => "transport-info",
            Self::ContentModify => "content-modify",
            Self::SourceAdd => "source-add",
            Self::SourceRemove => "source-remove",
            Self::TransportReplace => "transport-replace",
        }
    }
}

impl fmt::Display for JingleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JingleAction {
    type Err = JingleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session-initiate" => Ok(Self::SessionInitiate),
            "session-accept" => Ok(Self::SessionAccept),
            "session-terminate" => Ok(Self::SessionTerminate),
            "transport-info" => Ok(Self::TransportInfo),
            "content-modify" => Ok(Self::ContentModify),
            "source-add" => Ok(Self::SourceAdd),
            "source-remove" => Ok(Self::SourceRemove),
            "transport-replace" => Ok(Self::TransportReplace),
            other => Err(JingleError::UnknownAction(other.to_string())),
        }
    }
}

/// Which party created a content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Creator {
    Initiator,
    Responder,
}

/// Media direction of a content, from the point of view of the session roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Senders {
    /// Both parties send.
    Both,
    /// Nobody sends; the content is effectively paused.
    None,
    /// Only the session initiator sends.
    Initiator,
    /// Only the session responder sends.
    Responder,
}

impl fmt::Display for Senders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Both => "both",
            Self::None => "none",
            Self::Initiator => "initiator",
            Self::Responder => "responder",
        };
        f.write_str(s)
    }
}

/// Name of a content block, conventionally the media kind it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentName(String);

impl ContentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The conventional audio content name.
    pub fn audio() -> Self {
        Self("audio".to_string())
    }

    /// The conventional video content name.
    pub fn video() -> Self {
        Self("video".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reason condition carried on a session-terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminateReason {
    Success,
    Busy,
    Cancel,
    ConnectivityError,
    Decline,
    Expired,
    FailedApplication,
    FailedTransport,
    GeneralError,
    Gone,
    IncompatibleParameters,
    MediaError,
    SecurityError,
    Timeout,
    UnsupportedApplications,
    UnsupportedTransports,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Busy => "busy",
            Self::Cancel => "cancel",
            Self::ConnectivityError => "connectivity-error",
            Self::Decline => "decline",
            Self::Expired => "expired",
            Self::FailedApplication => "failed-application",
            Self::FailedTransport => "failed-transport",
            Self::GeneralError => "general-error",
            Self::Gone => "gone",
            Self::IncompatibleParameters => "incompatible-parameters",
            Self::MediaError => "media-error",
            Self::SecurityError => "security-error",
            Self::Timeout => "timeout",
            Self::UnsupportedApplications => "unsupported-applications",
            Self::UnsupportedTransports => "unsupported-transports",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason element of a session-terminate payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// Machine-readable condition.
    pub condition: TerminateReason,
    /// Optional human-readable detail.
    pub text: Option<String>,
}

impl Reason {
    pub fn new(condition: TerminateReason) -> Self {
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

/// One content block of a Jingle payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Which party created this content.
    pub creator: Creator,
    /// Content name, unique within the session.
    pub name: ContentName,
    /// Direction, when the action carries one.
    pub senders: Option<Senders>,
    /// Media description, present on offers and answers.
    pub description: Option<MediaDescription>,
    /// ICE transport block, present on offers, answers and transport updates.
    pub transport: Option<IceTransport>,
}

impl Content {
    pub fn new(creator: Creator, name: ContentName) -> Self {
        Self {
            creator,
            name,
            senders: None,
            description: None,
            transport: None,
        }
    }

    pub fn with_senders(mut self, senders: Senders) -> Self {
        self.senders = Some(senders);
        self
    }

    pub fn with_description(mut self, description: MediaDescription) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_transport(mut self, transport: IceTransport) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Body of a Jingle signaling IQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JinglePayload {
    /// Action this payload performs.
    pub action: JingleAction,
    /// Session the payload belongs to.
    pub sid: SessionId,
    /// Session initiator, set on session-initiate.
    pub initiator: Option<EndpointId>,
    /// Session responder, set on session-accept.
    pub responder: Option<EndpointId>,
    /// Content blocks, in offer order.
    pub contents: Vec<Content>,
    /// Terminate reason, set on session-terminate.
    pub reason: Option<Reason>,
    /// Relay correlation id. Carried on relay-initiated session-initiate and
    /// echoed back on session-terminate so the relay can tell successive
    /// renegotiations of one logical call apart.
    pub bridge_session: Option<String>,
}

impl JinglePayload {
    pub fn new(action: JingleAction, sid: SessionId) -> Self {
        Self {
            action,
            sid,
            initiator: None,
            responder: None,
            contents: Vec::new(),
            reason: None,
            bridge_session: None,
        }
    }

    pub fn with_initiator(mut self, initiator: EndpointId) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_responder(mut self, responder: EndpointId) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn add_content(mut self, content: Content) -> Self {
        self.contents.push(content);
        self
    }

    pub fn with_reason(mut self, reason: Reason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_bridge_session(mut self, id: impl Into<String>) -> Self {
        self.bridge_session = Some(id.into());
        self
    }

    /// Find a content block by name.
    pub fn content(&self, name: &ContentName) -> Option<&Content> {
        self.contents.iter().find(|c| &c.name == name)
    }
}
