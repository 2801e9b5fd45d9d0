//! Conference-level error taxonomy.
//!
//! Most inbound trouble (unknown session ids, malformed payloads) is
//! handled by logging and dropping, not by returning errors; what remains
//! here is the small set of failures a caller can meaningfully react to.

use thiserror::Error;

use rmeet_session_core::SessionError;

/// Errors surfaced by the conference orchestration layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConferenceError {
    /// A session operation forwarded by the controller failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The conference event channel has no live publisher left.
    #[error("conference event stream closed")]
    EventsClosed,
}

pub type Result<T> = std::result::Result<T, ConferenceError>;
