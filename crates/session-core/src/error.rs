//! Error types for the session negotiation engine.
//!
//! The taxonomy separates caller bugs from network outcomes:
//! - [`SessionError::RoleViolation`] is a programming-contract violation and
//!   is returned synchronously, before anything is enqueued or sent.
//! - Operations against an ended session or closed transport degrade to
//!   logged no-ops at the call site; the variants here cover the cases where
//!   a queued task observes the closed state mid-flight.
//! - Protocol errors and timeouts come back from the peer and are delivered
//!   through the completion path of the enqueued task that sent the request.
//! - Malformed inbound data never surfaces as an error at all; it is dropped
//!   with a warning where it is parsed.

use thiserror::Error;

use rmeet_jingle_core::{ErrorStanza, IqFailure};

/// Errors produced by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// An initiator-only operation was invoked on a responder session or
    /// vice versa. Caller bug; nothing was enqueued or sent.
    #[error("{operation} may only be called on the session {required_role}")]
    RoleViolation {
        /// Operation that was attempted.
        operation: &'static str,
        /// Role the operation requires.
        required_role: &'static str,
    },

    /// The session has reached its terminal state.
    #[error("session has ended")]
    SessionEnded,

    /// The media transport is closed.
    #[error("media transport is closed")]
    TransportClosed,

    /// Renegotiation was requested but no remote description is available.
    #[error("no remote description available")]
    NoRemoteDescription,

    /// The peer answered a request with an error stanza.
    #[error("protocol error: {0}")]
    Protocol(ErrorStanza),

    /// An awaited IQ exchange did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The session-accept exchange specifically timed out. Raised as its own
    /// variant because it additionally triggers restart policy upstream.
    #[error("session-accept timed out")]
    AcceptTimeout,

    /// The signaling connection is gone.
    #[error("signaling disconnected")]
    Disconnected,

    /// The media engine rejected an operation.
    #[error("engine error: {0}")]
    Engine(String),

    /// The session's work queue no longer accepts tasks.
    #[error("session work queue is closed")]
    QueueClosed,

    /// Invariant breakage that should not happen in correct operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Build an initiator-only contract violation.
    pub(crate) fn initiator_only(operation: &'static str) -> Self {
        Self::RoleViolation {
            operation,
            required_role: "initiator",
        }
    }

    /// Build a responder-only contract violation.
    pub(crate) fn responder_only(operation: &'static str) -> Self {
        Self::RoleViolation {
            operation,
            required_role: "responder",
        }
    }
}

impl From<IqFailure> for SessionError {
    fn from(failure: IqFailure) -> Self {
        match failure {
            IqFailure::Timeout => Self::Timeout,
            IqFailure::Error(stanza) => Self::Protocol(stanza),
            IqFailure::Disconnected => Self::Disconnected,
        }
    }
}

impl From<crate::engine::EngineError> for SessionError {
    fn from(error: crate::engine::EngineError) -> Self {
        Self::Engine(error.0)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
