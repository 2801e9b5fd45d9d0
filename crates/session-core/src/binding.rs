//! Source-to-participant bindings.
//!
//! Remote media arrives tagged only with a numeric SSRC; signaling metadata
//! (session descriptions, source advertisements) says which participant owns
//! which SSRC. [`SignalingBinding`] holds that mapping for one transport.
//! Entries are evicted when their source leaves the applied remote
//! description, so the map stays bounded by the live source set.
//!
//! Presence-derived per-participant media state (muted, video type) is owned
//! by the room layer and reached through [`PresenceDirectory`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use rmeet_jingle_core::{EndpointId, MediaKind};

/// SSRC to owning-participant map for one media transport.
#[derive(Debug, Default)]
pub struct SignalingBinding {
    sources: DashMap<u32, EndpointId>,
}

impl SignalingBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner` owns source `ssrc`.
    ///
    /// Re-registering the same owner is a no-op; a different owner for an
    /// already-bound source overwrites and is logged, since it usually means
    /// the remote side reused an SSRC without announcing its removal.
    pub fn register_source(&self, ssrc: u32, owner: EndpointId) {
        if let Some(previous) = self.sources.insert(ssrc, owner.clone()) {
            if previous != owner {
                warn!(
                    "ssrc {} rebound from {} to {}",
                    ssrc, previous, owner
                );
            }
        }
    }

    /// Owner of a source, if one was registered.
    pub fn owner_of(&self, ssrc: u32) -> Option<EndpointId> {
        self.sources.get(&ssrc).map(|entry| entry.value().clone())
    }

    /// Drop the binding for a source. Returns the former owner.
    pub fn remove_source(&self, ssrc: u32) -> Option<EndpointId> {
        self.sources.remove(&ssrc).map(|(_, owner)| owner)
    }

    /// All sources currently bound to `owner`.
    pub fn sources_owned_by(&self, owner: &EndpointId) -> Vec<u32> {
        self.sources
            .iter()
            .filter(|entry| entry.value() == owner)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Presence-derived media state for one participant and media kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerMediaInfo {
    /// The participant advertises this media as muted.
    pub muted: bool,

    /// Advertised video type (for example "camera" or "desktop").
    pub video_type: Option<String>,
}

/// Read access to the room layer's presence metadata.
pub trait PresenceDirectory: Send + Sync {
    /// Presence-derived media state for a participant, when known.
    fn peer_media_info(&self, id: &EndpointId, media: MediaKind) -> Option<PeerMediaInfo>;
}
