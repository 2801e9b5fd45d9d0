//! Session event surface.
//!
//! Each session emits typed events over a dedicated mpsc channel handed out
//! at construction; the composing layer (the conference controller) owns the
//! receiver and decides what to surface to the application. No global bus:
//! one producer, one consumer, per session.

use rmeet_jingle_core::{EndpointId, MediaKind, TerminateReason};

use crate::engine::IceConnectionState;
use crate::transport::RemoteTrack;

/// Events emitted by one Jingle session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The underlying ICE connection state changed.
    IceConnectionStateChanged {
        state: IceConnectionState,
    },

    /// First time this session's media path became usable. Fires at most
    /// once per session, ICE restarts included.
    MediaSessionEstablished,

    /// Connectivity reached for the first time.
    ConnectionEstablished,

    /// Connectivity lost after having been established.
    ConnectionInterrupted,

    /// Connectivity recovered after an interruption.
    ConnectionRestored,

    /// A renegotiation attempt was rejected or failed.
    RenegotiationFailed {
        reason: String,
    },

    /// The session-accept exchange timed out; upstream restart policy
    /// decides what happens to the session.
    AcceptTimeout,

    /// A remote track with a resolved owner became available.
    RemoteTrackAdded {
        track: RemoteTrack,
    },

    /// A remote track disappeared from the negotiated description.
    RemoteTrackRemoved {
        owner: EndpointId,
        media: MediaKind,
    },

    /// The session reached its terminal state.
    Ended {
        reason: TerminateReason,
    },
}
