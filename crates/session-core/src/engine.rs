//! Media engine collaborator surface.
//!
//! The actual ICE/DTLS/SRTP machinery lives in an external WebRTC engine.
//! This module pins down the narrow interface the negotiation core needs
//! from it: structured offer/answer generation, description application,
//! candidate injection, track plumbing, and an event stream. Production
//! code binds a real engine behind [`SessionDescriptionOps`]; tests use the
//! in-memory fake from [`crate::testing`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use rmeet_jingle_core::{ContentName, IceCandidate, MediaKind, SessionDescription};

use crate::config::SessionConfig;

/// Offer/answer machine state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No offer in flight.
    Stable,

    /// A local offer has been applied, awaiting the remote answer.
    HaveLocalOffer,

    /// A remote offer has been applied, awaiting the local answer.
    HaveRemoteOffer,

    /// The engine is shut down.
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::HaveLocalOffer => write!(f, "have-local-offer"),
            Self::HaveRemoteOffer => write!(f, "have-remote-offer"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// ICE connection state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    /// Initial state.
    New,

    /// Connectivity checks in progress.
    Checking,

    /// A usable pair was found.
    Connected,

    /// Checks finished with a nominated pair.
    Completed,

    /// No usable pair could be found.
    Failed,

    /// Connectivity was lost, checks may recover it.
    Disconnected,

    /// The engine is shut down.
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Checking => write!(f, "checking"),
            Self::Connected => write!(f, "connected"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A local candidate discovered by the engine, tagged with the content it
/// belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCandidate {
    pub content: ContentName,
    pub candidate: IceCandidate,
}

/// Events emitted by the media engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local ICE candidate was discovered; `None` marks the end of
    /// gathering for the current generation.
    CandidateDiscovered(Option<LocalCandidate>),

    /// ICE connection state change.
    IceConnectionStateChanged(IceConnectionState),

    /// Signaling state change.
    SignalingStateChanged(SignalingState),
}

/// Identifier of a local track within one transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
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

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A local media track offered into the session.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    pub id: TrackId,
    pub kind: MediaKind,
    pub muted: bool,
}

impl LocalTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: TrackId::generate(),
            kind,
            muted: false,
        }
    }

    pub fn with_id(mut self, id: TrackId) -> Self {
        self.id = id;
        self
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }
}

/// Outcome of a track swap at the engine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSwapOutcome {
    /// The sender was substituted in place; no signaling change needed.
    Swapped,

    /// The swap added or removed a media kind; an offer/answer cycle is
    /// required before the change takes effect.
    RenegotiationNeeded,
}

/// Sender-side video constraints applied outside the offer/answer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SenderVideoSettings {
    /// Upper bound on encoded frame height.
    pub max_height: Option<u32>,
}

/// The engine rejected an operation. Opaque: engine internals are not this
/// crate's business, only whether the enqueued task succeeded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("engine error: {0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Structured offer/answer operations provided by the media engine.
///
/// All mutating calls are made from within a session's work queue; the
/// engine never sees two concurrent offer/answer operations for one
/// transport.
#[async_trait]
pub trait SessionDescriptionOps: Send + Sync {
    /// Produce a fresh local offer reflecting current tracks.
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Produce a local answer to the currently applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    /// Apply a description as the local half of the pair.
    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), EngineError>;

    /// Apply a description as the remote half of the pair.
    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), EngineError>;

    /// Inject one remote ICE candidate for the named content.
    async fn add_ice_candidate(
        &self,
        content: &ContentName,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError>;

    /// Current offer/answer machine state.
    fn signaling_state(&self) -> SignalingState;

    /// Add a local track to the transport.
    async fn add_track(&self, track: LocalTrack) -> Result<(), EngineError>;

    /// Remove a local track from the transport.
    async fn remove_track(&self, track: &TrackId) -> Result<(), EngineError>;

    /// Swap a local track. `None` for `new` removes, `None` for `old` adds.
    async fn replace_track(
        &self,
        old: Option<&TrackId>,
        new: Option<&LocalTrack>,
    ) -> Result<TrackSwapOutcome, EngineError>;

    /// Bound the resolution requested from remote senders. On bridged
    /// transports this drives the relay's bandwidth allocation.
    async fn set_receiver_video_constraint(
        &self,
        max_height: Option<u32>,
    ) -> Result<(), EngineError>;

    /// Apply sender-side encoding constraints.
    async fn set_sender_video_settings(
        &self,
        settings: SenderVideoSettings,
    ) -> Result<(), EngineError>;

    /// Begin a new ICE generation.
    async fn restart_ice(&self) -> Result<(), EngineError>;

    /// Shut the engine down. Idempotent.
    async fn close(&self);
}

/// Builds one engine instance per media transport.
///
/// Returns the operations handle together with the receiver for the
/// engine's event stream; the caller owns the receiver and pumps it.
#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    async fn create(
        &self,
        config: &SessionConfig,
    ) -> Result<(std::sync::Arc<dyn SessionDescriptionOps>, mpsc::UnboundedReceiver<EngineEvent>), EngineError>;
}
