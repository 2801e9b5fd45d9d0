//! Media transport wrapper.
//!
//! [`MediaTransport`] sits between a session and its media engine. It keeps
//! the transport's signaling model (the stored local/remote description
//! pair), the local and remote track sets, and the source binding, and it
//! enforces the ownership invariant: a remote source is surfaced as a track
//! only once its owner is resolvable, and sources that disappear from the
//! applied remote description drop their track and their binding entry.
//!
//! All mutating methods are called from the owning session's work queue or
//! from the constructor path; nothing here is re-entrant.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use rmeet_jingle_core::{
    ContentName, EndpointId, IceCandidate, IceParameters, IceTransport, MediaKind, MediaSection,
    Senders, SessionDescription,
};

use crate::binding::{PresenceDirectory, SignalingBinding};
use crate::engine::{
    LocalTrack, SenderVideoSettings, SessionDescriptionOps, SignalingState, TrackId,
    TrackSwapOutcome,
};
use crate::error::{Result, SessionError};

/// A remote media track with resolved ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    /// Participant the media belongs to.
    pub owner: EndpointId,
    /// Media kind.
    pub media: MediaKind,
    /// Primary SSRC carrying the media.
    pub ssrc: u32,
    /// Muted state at surface time, from presence.
    pub muted: bool,
}

/// Track lifecycle notifications emitted by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A remote track with a resolved owner became available.
    RemoteTrackAdded(RemoteTrack),

    /// A remote track disappeared from the negotiated description.
    RemoteTrackRemoved { owner: EndpointId, media: MediaKind },
}

/// One media-transport connection and its signaling model.
pub struct MediaTransport {
    engine: Arc<dyn SessionDescriptionOps>,
    binding: Arc<SignalingBinding>,
    presence: Arc<dyn PresenceDirectory>,

    local_description: RwLock<Option<SessionDescription>>,
    remote_description: RwLock<Option<SessionDescription>>,

    local_tracks: DashMap<TrackId, LocalTrack>,
    remote_tracks: DashMap<(EndpointId, MediaKind), RemoteTrack>,

    closed: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MediaTransport {
    /// Wrap an engine. Returns the transport together with the receiver for
    /// its track events.
    pub fn new(
        engine: Arc<dyn SessionDescriptionOps>,
        binding: Arc<SignalingBinding>,
        presence: Arc<dyn PresenceDirectory>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            engine,
            binding,
            presence,
            local_description: RwLock::new(None),
            remote_description: RwLock::new(None),
            local_tracks: DashMap::new(),
            remote_tracks: DashMap::new(),
            closed: AtomicBool::new(false),
            events,
        };
        (transport, events_rx)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::TransportClosed)
        } else {
            Ok(())
        }
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Offer/answer machine state; `Closed` once the transport is closed.
    pub fn signaling_state(&self) -> SignalingState {
        if self.is_closed() {
            SignalingState::Closed
        } else {
            self.engine.signaling_state()
        }
    }

    /// The source binding this transport resolves owners through.
    pub fn binding(&self) -> &SignalingBinding {
        &self.binding
    }

    // ---- descriptions ----

    /// Produce a fresh local offer from the engine.
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        Ok(self.engine.create_offer().await?)
    }

    /// Produce a local answer from the engine.
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        Ok(self.engine.create_answer().await?)
    }

    /// Apply a description as local and store it as the transport's local
    /// half.
    pub async fn apply_local_description(&self, description: SessionDescription) -> Result<()> {
        self.ensure_open()?;
        self.engine.set_local_description(description.clone()).await?;
        *self.local_description.write().await = Some(description);
        Ok(())
    }

    /// Store a description as the transport's remote half without touching
    /// the engine, and feed inline source ownership into the binding.
    ///
    /// The engine application happens later, inside the renegotiation
    /// ordering for the session's role.
    pub async fn stage_remote_description(&self, description: SessionDescription) {
        for (ssrc, owner) in description.source_owners() {
            self.binding.register_source(ssrc, owner.clone());
        }
        *self.remote_description.write().await = Some(description);
    }

    /// Apply the stored remote description to the engine.
    pub async fn commit_remote_description(&self) -> Result<()> {
        self.ensure_open()?;
        let description = self
            .remote_description
            .read()
            .await
            .clone()
            .ok_or(SessionError::NoRemoteDescription)?;
        self.engine.set_remote_description(description).await?;
        Ok(())
    }

    /// Current stored local description.
    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.local_description.read().await.clone()
    }

    /// Current stored remote description.
    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_description.read().await.clone()
    }

    /// True when a remote description has been staged.
    pub async fn has_remote_description(&self) -> bool {
        self.remote_description.read().await.is_some()
    }

    /// Mutate the direction of a content in the stored local description
    /// only. Used by content-modify, which must never rewrite remote state.
    pub async fn modify_local_senders(&self, name: &ContentName, senders: Senders) {
        let mut guard = self.local_description.write().await;
        if let Some(description) = guard.as_mut() {
            if !description.set_senders(name, senders) {
                debug!("content-modify for absent local content {}", name);
            }
        }
    }

    /// Merge announced sources into the stored remote description.
    /// Returns how many sources were new.
    pub async fn merge_remote_sources(&self, additions: &[rmeet_jingle_core::Content]) -> usize {
        let mut guard = self.remote_description.write().await;
        match guard.as_mut() {
            Some(description) => {
                let added = description.merge_sources(additions);
                for (ssrc, owner) in description.source_owners() {
                    self.binding.register_source(ssrc, owner.clone());
                }
                added
            }
            None => {
                warn!("source-add before any remote description, dropping");
                0
            }
        }
    }

    /// Remove announced sources from the stored remote description and evict
    /// their bindings. Returns how many sources were removed.
    pub async fn remove_remote_sources(&self, removals: &[rmeet_jingle_core::Content]) -> usize {
        let mut guard = self.remote_description.write().await;
        match guard.as_mut() {
            Some(description) => {
                let removed = description.remove_sources(removals);
                for entry in &removed {
                    if let Some(ssrc) = entry.ssrc() {
                        self.binding.remove_source(ssrc);
                    }
                }
                removed.len()
            }
            None => {
                warn!("source-remove before any remote description, dropping");
                0
            }
        }
    }

    /// Swap the transport block of the stored remote description, dropping
    /// candidates from the previous ICE generation.
    pub async fn replace_remote_transport(&self, transport: &IceTransport) -> Result<()> {
        let mut guard = self.remote_description.write().await;
        match guard.as_mut() {
            Some(description) => {
                description.replace_transport(transport);
                Ok(())
            }
            None => Err(SessionError::NoRemoteDescription),
        }
    }

    /// ICE material of a content in the stored local description, used when
    /// flushing candidate batches.
    pub async fn local_section_info(
        &self,
        name: &ContentName,
    ) -> Option<(Option<IceParameters>, Option<rmeet_jingle_core::Fingerprint>)> {
        let guard = self.local_description.read().await;
        let description = guard.as_ref()?;
        let section = description.section(name)?;
        Some((section.ice.clone(), section.fingerprint.clone()))
    }

    // ---- tracks ----

    /// Add a local track to the transport.
    pub async fn add_local_track(&self, track: LocalTrack) -> Result<()> {
        self.ensure_open()?;
        self.engine.add_track(track.clone()).await?;
        self.local_tracks.insert(track.id.clone(), track);
        Ok(())
    }

    /// Remove a local track from the transport.
    pub async fn remove_local_track(&self, id: &TrackId) -> Result<()> {
        self.ensure_open()?;
        self.engine.remove_track(id).await?;
        self.local_tracks.remove(id);
        Ok(())
    }

    /// Swap a local track at the engine level, recording the change in the
    /// local track map.
    pub async fn replace_local_track(
        &self,
        old: Option<&TrackId>,
        new: Option<LocalTrack>,
    ) -> Result<TrackSwapOutcome> {
        self.ensure_open()?;
        let outcome = self.engine.replace_track(old, new.as_ref()).await?;
        if let Some(old_id) = old {
            self.local_tracks.remove(old_id);
        }
        if let Some(track) = new {
            self.local_tracks.insert(track.id.clone(), track);
        }
        Ok(outcome)
    }

    /// Snapshot of the local track set.
    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        self.local_tracks.iter().map(|e| e.value().clone()).collect()
    }

    /// Remote track for one participant and media kind, if surfaced.
    pub fn remote_track(&self, owner: &EndpointId, media: MediaKind) -> Option<RemoteTrack> {
        self.remote_tracks
            .get(&(owner.clone(), media))
            .map(|e| e.value().clone())
    }

    /// Number of surfaced remote tracks.
    pub fn remote_track_count(&self) -> usize {
        self.remote_tracks.len()
    }

    /// Reconcile the surfaced remote track set with the stored remote
    /// description.
    ///
    /// Sources whose owner cannot be resolved through the binding are
    /// dropped with a warning and never surfaced. Tracks whose sources left
    /// the description are removed, and their binding entries evicted.
    pub async fn sync_remote_tracks(&self) {
        let Some(description) = self.remote_description.read().await.clone() else {
            return;
        };

        let mut wanted: HashMap<(EndpointId, MediaKind), u32> = HashMap::new();
        for section in &description.contents {
            for (ssrc, source) in section.valid_sources() {
                let owner = match source.owner.clone().or_else(|| self.binding.owner_of(ssrc)) {
                    Some(owner) => owner,
                    None => {
                        warn!("dropping source {} with no resolvable owner", ssrc);
                        continue;
                    }
                };
                wanted.entry((owner, section.media)).or_insert(ssrc);
            }
        }

        for ((owner, media), ssrc) in &wanted {
            let key = (owner.clone(), *media);
            match self.remote_tracks.get_mut(&key) {
                Some(mut existing) => {
                    if existing.ssrc != *ssrc {
                        existing.ssrc = *ssrc;
                    }
                }
                None => {
                    let muted = self
                        .presence
                        .peer_media_info(owner, *media)
                        .map(|info| info.muted)
                        .unwrap_or(false);
                    let track = RemoteTrack {
                        owner: owner.clone(),
                        media: *media,
                        ssrc: *ssrc,
                        muted,
                    };
                    debug!("surfacing remote {} track for {}", media, owner);
                    self.remote_tracks.insert(key, track.clone());
                    let _ = self.events.send(TransportEvent::RemoteTrackAdded(track));
                }
            }
        }

        let gone: Vec<(EndpointId, MediaKind)> = self
            .remote_tracks
            .iter()
            .filter(|entry| !wanted.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in gone {
            if let Some((_, track)) = self.remote_tracks.remove(&key) {
                debug!("removing remote {} track for {}", track.media, track.owner);
                self.binding.remove_source(track.ssrc);
                let _ = self.events.send(TransportEvent::RemoteTrackRemoved {
                    owner: track.owner,
                    media: track.media,
                });
            }
        }
    }

    // ---- candidates and constraints ----

    /// Inject one remote candidate into the engine.
    pub async fn add_remote_candidate(
        &self,
        content: &ContentName,
        candidate: &IceCandidate,
    ) -> Result<()> {
        self.ensure_open()?;
        self.engine.add_ice_candidate(content, candidate).await?;
        Ok(())
    }

    /// Bound the resolution requested from remote senders (the relay's
    /// bandwidth-allocation path on bridged transports).
    pub async fn set_receiver_video_constraint(&self, max_height: Option<u32>) -> Result<()> {
        self.ensure_open()?;
        self.engine.set_receiver_video_constraint(max_height).await?;
        Ok(())
    }

    /// Apply sender-side encoding constraints.
    pub async fn set_sender_video_settings(&self, settings: SenderVideoSettings) -> Result<()> {
        self.ensure_open()?;
        self.engine.set_sender_video_settings(settings).await?;
        Ok(())
    }

    /// Begin a new ICE generation.
    pub async fn restart_ice(&self) -> Result<()> {
        self.ensure_open()?;
        self.engine.restart_ice().await?;
        Ok(())
    }

    /// Close the transport and the engine behind it. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.engine.close().await;
    }

    /// SSRCs currently present in the stored remote description.
    pub async fn remote_ssrcs(&self) -> HashSet<u32> {
        match self.remote_description.read().await.as_ref() {
            Some(description) => description.ssrcs().into_iter().collect(),
            None => HashSet::new(),
        }
    }

    /// Sections of the stored local description, for building outbound
    /// payloads.
    pub async fn local_sections(&self) -> Vec<MediaSection> {
        self.local_description
            .read()
            .await
            .as_ref()
            .map(|d| d.contents.clone())
            .unwrap_or_default()
    }
}
