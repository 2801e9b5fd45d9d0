//! Jingle session negotiation engine.
//!
//! This crate implements the per-peer negotiation machinery of a
//! conferencing client: the session state machine, the serialized work
//! queue that orders every media-transport mutation, ICE candidate
//! batching, the role-ordered offer/answer renegotiation algorithm, and
//! source-to-participant binding. The media engine (ICE/DTLS/SRTP) and the
//! XMPP stream are external collaborators reached through the traits in
//! [`engine`] and [`signaling`]; in-memory fakes for both live in
//! [`testing`].

// Error taxonomy
pub mod error;

// Per-session settings
pub mod config;

// Serialized task queue
pub mod queue;

// Media engine collaborator traits
pub mod engine;

// Source-to-participant bindings
pub mod binding;

// Outbound signaling surface
pub mod signaling;

// Media transport wrapper
pub mod transport;

// Session event surface
pub mod events;

// The Jingle session state machine
pub mod session;

// In-memory fakes for tests and examples
pub mod testing;

// Public exports
pub use binding::{PeerMediaInfo, PresenceDirectory, SignalingBinding};
pub use config::{SessionConfig, DEFAULT_CANDIDATE_BATCH_WINDOW, DEFAULT_IQ_TIMEOUT};
pub use engine::{
    EngineError, EngineEvent, IceConnectionState, LocalCandidate, LocalTrack,
    MediaTransportFactory, SenderVideoSettings, SessionDescriptionOps, SignalingState, TrackId,
    TrackSwapOutcome,
};
pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use queue::{QueueClosed, SerialWorkQueue, TaskExecutor};
pub use session::{JingleSession, SessionParams, SessionRole, SessionState, SessionTopology};
pub use signaling::SignalingTransport;
pub use transport::{MediaTransport, RemoteTrack, TransportEvent};

/// Re-export of common types and traits
pub mod prelude {
    pub use super::{
        IceConnectionState, JingleSession, LocalTrack, MediaTransportFactory, PresenceDirectory,
        SenderVideoSettings, SessionConfig, SessionError, SessionEvent, SessionParams,
        SessionRole, SessionState, SessionTopology, SignalingTransport, TrackId,
    };
    pub use rmeet_jingle_core::prelude::*;
}
