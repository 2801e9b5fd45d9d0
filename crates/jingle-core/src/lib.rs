//! Typed Jingle signaling model for the RMEET conferencing stack.
//!
//! This crate defines the offer/answer protocol vocabulary exchanged over the
//! XMPP signaling link: Jingle actions and payloads, ICE transport blocks with
//! their candidates, and the structured session-description document the media
//! engine produces and consumes. The XMPP stream itself (stanza framing,
//! stream management, reconnection) lives outside this stack; anything that
//! can carry these fields is an acceptable wire encoding, so every type here
//! derives serde support.

// Error handling
pub mod error;

// Identifier newtypes
pub mod types;

// Jingle actions, contents and payload envelope
pub mod payload;

// ICE transport blocks, candidates, fingerprints
pub mod candidate;

// Structured session-description document
pub mod description;

// IQ request/response envelope and failure taxonomy
pub mod iq;

// Public exports
pub use candidate::{CandidateKind, Fingerprint, IceCandidate, IceParameters, IceTransport, Setup};
pub use description::{MediaDescription, MediaKind, MediaSection, SessionDescription, SourceEntry, SourceParameter};
pub use error::{JingleError, Result};
pub use iq::{ErrorCondition, ErrorStanza, IqFailure, IqRequest, StanzaId};
pub use payload::{Content, ContentName, Creator, JingleAction, JinglePayload, Reason, Senders, TerminateReason};
pub use types::{EndpointId, SessionId};

/// Re-export of common types
pub mod prelude {
    pub use super::{
        CandidateKind, Content, ContentName, Creator, EndpointId, ErrorCondition, ErrorStanza,
        Fingerprint, IceCandidate, IceParameters, IceTransport, IqFailure, IqRequest,
        JingleAction, JingleError, JinglePayload, MediaDescription, MediaKind, MediaSection,
        Reason, Senders, SessionDescription, SessionId, Setup, SourceEntry, StanzaId,
        TerminateReason,
    };
}
