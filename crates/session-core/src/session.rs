//! Jingle session state machine.
//!
//! One [`JingleSession`] per peer connection: one for the bridge, zero or
//! one for a direct peer. The session owns a [`MediaTransport`], a
//! [`SerialWorkQueue`] that serializes every mutation against that
//! transport, and the negotiation metadata (candidate batching state,
//! video-direction flags, pending resolution preferences).
//!
//! Lifecycle is `pending` → `active` → `ended`. The `pending` → `active`
//! transition fires exactly once, when the first full offer/answer cycle
//! completes; `ended` is terminal and turns every later mutating call into
//! a logged no-op. Role-restricted operations (`invite`, `set_answer`,
//! `accept_offer`) fail synchronously when called on the wrong role, before
//! anything is enqueued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use rmeet_jingle_core::{
    Content, ContentName, Creator, EndpointId, IceCandidate, IceTransport, JingleAction,
    JinglePayload, MediaDescription, MediaKind, Reason, Senders, SessionDescription, SessionId,
    TerminateReason,
};

use crate::binding::PresenceDirectory;
use crate::config::SessionConfig;
use crate::engine::{
    EngineEvent, IceConnectionState, LocalCandidate, LocalTrack, MediaTransportFactory,
    SenderVideoSettings, SignalingState, TrackId, TrackSwapOutcome,
};
use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::queue::{SerialWorkQueue, TaskExecutor};
use crate::signaling::SignalingTransport;
use crate::transport::{MediaTransport, RemoteTrack, TransportEvent};

/// Which side of the negotiation the local endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Local side sent (or will send) the session-initiate.
    Initiator,
    /// Local side answers a received session-initiate.
    Responder,
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Transport topology of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTopology {
    /// Media flows through the central relay.
    Bridged,
    /// Media flows directly to the single remote peer.
    PeerToPeer,
}

impl SessionTopology {
    pub fn is_p2p(&self) -> bool {
        matches!(self, Self::PeerToPeer)
    }
}

impl std::fmt::Display for SessionTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bridged => write!(f, "bridged"),
            Self::PeerToPeer => write!(f, "p2p"),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session exists, first offer/answer cycle not yet completed.
    Pending,
    /// First offer/answer cycle committed.
    Active,
    /// Terminal. All further mutating operations are logged no-ops.
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Identity and settings for one session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Negotiation id, unique per session.
    pub sid: SessionId,
    /// Local participant address.
    pub local: EndpointId,
    /// Remote participant address.
    pub peer: EndpointId,
    /// Local side of the negotiation.
    pub role: SessionRole,
    /// Bridged or direct.
    pub topology: SessionTopology,
    /// Negotiation settings.
    pub config: SessionConfig,
}

/// Work items executed on the session's serial queue. Each runs to full
/// completion, including every await inside it, before the next starts.
enum SessionTask {
    /// Add initial tracks, produce and apply the local offer, send
    /// session-initiate.
    Invite { tracks: Vec<LocalTrack> },

    /// Add initial tracks, stage the remote offer, run the responder
    /// offer/answer cycle, send session-accept.
    AcceptOffer {
        offer: SessionDescription,
        tracks: Vec<LocalTrack>,
    },

    /// The renegotiation primitive: optional fresh remote description plus
    /// extra local tracks, then a role-ordered offer/answer exchange.
    Renegotiate {
        remote: Option<SessionDescription>,
        tracks: Vec<LocalTrack>,
    },

    /// Swap a local track, renegotiating when the engine requires it.
    ReplaceTrack {
        old: Option<TrackId>,
        new: Option<LocalTrack>,
    },

    /// Apply a batch of remote candidates.
    ApplyCandidates {
        candidates: Vec<(ContentName, IceCandidate)>,
    },

    /// Merge a source-add advertisement and renegotiate.
    AddRemoteSources { contents: Vec<Content> },

    /// Apply a source-remove advertisement and renegotiate.
    RemoveRemoteSources { contents: Vec<Content> },

    /// Swap the remote transport block and start a new ICE generation.
    ReplaceTransport { transport: IceTransport },

    /// Close the media transport once in-flight work has drained.
    Close,
}

struct SessionInner {
    sid: SessionId,
    local: EndpointId,
    peer: EndpointId,
    role: SessionRole,
    topology: SessionTopology,
    config: SessionConfig,

    transport: Arc<MediaTransport>,
    signaling: Arc<dyn SignalingTransport>,

    state: RwLock<SessionState>,

    // One-shot media-session-established latch; survives ICE restarts.
    was_connected: AtomicBool,
    connection_established: AtomicBool,
    connection_interrupted: AtomicBool,

    // End-of-candidates marker seen; the marker itself is never sent.
    last_candidate_sent: AtomicBool,
    gathering_started: RwLock<Option<Instant>>,
    gathering_completed: RwLock<Option<Instant>>,

    // Relay correlation id, updated across relay-triggered renegotiations.
    bridge_session_id: RwLock<Option<String>>,

    local_video_active: AtomicBool,
    remote_video_active: AtomicBool,
    receiver_max_height: RwLock<Option<u32>>,
    sender_video_settings: RwLock<Option<SenderVideoSettings>>,

    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn initiator_id(&self) -> &EndpointId {
        match self.role {
            SessionRole::Initiator => &self.local,
            SessionRole::Responder => &self.peer,
        }
    }

    async fn ended(&self) -> bool {
        *self.state.read().await == SessionState::Ended
    }

    /// Fire-and-forget send; failures are logged, never propagated.
    fn spawn_send(&self, payload: JinglePayload, label: &'static str) {
        let signaling = Arc::clone(&self.signaling);
        let peer = self.peer.clone();
        let sid = self.sid.clone();
        tokio::spawn(async move {
            if let Err(failure) = signaling.send_iq(&peer, &payload).await {
                warn!("failed to send {} for session {}: {}", label, sid, failure);
            }
        });
    }

    /// Send bounded by the configured response window.
    async fn send_awaited(&self, payload: &JinglePayload) -> Result<()> {
        match tokio::time::timeout(self.config.iq_timeout, self.signaling.send_iq(&self.peer, payload))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    /// Render the stored local description as contents of an outbound
    /// offer or answer.
    async fn local_contents(&self) -> Vec<Content> {
        match self.transport.local_description().await {
            Some(description) => description.to_contents(Creator::Initiator),
            None => Vec::new(),
        }
    }

    /// Renegotiation preconditions. Failing either rejects the cycle, emits
    /// a renegotiation-failed event, and leaves the transport untouched.
    async fn renegotiation_preconditions(&self, has_fresh_remote: bool) -> Result<()> {
        if self.transport.signaling_state() == SignalingState::Closed {
            self.emit(SessionEvent::RenegotiationFailed {
                reason: "transport is closed".to_string(),
            });
            return Err(SessionError::TransportClosed);
        }
        if !has_fresh_remote && !self.transport.has_remote_description().await {
            self.emit(SessionEvent::RenegotiationFailed {
                reason: "no remote description available".to_string(),
            });
            return Err(SessionError::NoRemoteDescription);
        }
        Ok(())
    }

    /// Role-ordered offer/answer exchange against the stored remote
    /// description.
    ///
    /// The initiator produces and applies a fresh offer before committing
    /// the remote description; the responder commits the remote description
    /// before producing its answer. This ordering mirrors offer/answer
    /// causality and must not be changed.
    async fn offer_answer_exchange(&self) -> Result<()> {
        match self.role {
            SessionRole::Initiator => {
                let offer = self.transport.create_offer().await?;
                self.transport.apply_local_description(offer).await?;
                self.transport.commit_remote_description().await?;
            }
            SessionRole::Responder => {
                self.transport.commit_remote_description().await?;
                let answer = self.transport.create_answer().await?;
                self.transport.apply_local_description(answer).await?;
            }
        }
        self.transport.sync_remote_tracks().await;
        Ok(())
    }

    /// First-cycle completion: transition to active exactly once and flush
    /// any preference accumulated while pending.
    async fn maybe_activate(&self) {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Pending {
                return;
            }
            *state = SessionState::Active;
        }
        debug!("{} session {} with {} is now active", self.topology, self.sid, self.peer);

        if self.topology.is_p2p() {
            let pending_height = *self.receiver_max_height.read().await;
            if !self.local_video_active.load(Ordering::SeqCst) || pending_height.is_some() {
                self.send_video_content_modify().await;
            }
        }
    }

    /// Advertise the local video direction and receive preference via
    /// content-modify. Mutates only the stored local description; remote
    /// state is never touched on this path.
    async fn send_video_content_modify(&self) {
        let active = self.local_video_active.load(Ordering::SeqCst);
        let senders = if active { Senders::Both } else { Senders::None };
        self.transport.modify_local_senders(&ContentName::video(), senders).await;

        let mut content = Content::new(Creator::Initiator, ContentName::video()).with_senders(senders);
        if let Some(height) = *self.receiver_max_height.read().await {
            content = content
                .with_description(MediaDescription::new(MediaKind::Video).with_max_frame_height(height));
        }
        let payload = JinglePayload::new(JingleAction::ContentModify, self.sid.clone())
            .with_initiator(self.initiator_id().clone())
            .add_content(content);
        self.spawn_send(payload, "content-modify");
    }

    async fn handle_ice_state(&self, state: IceConnectionState) {
        debug!("session {} ice connection state: {}", self.sid, state);
        self.emit(SessionEvent::IceConnectionStateChanged { state });
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                if !self.connection_established.swap(true, Ordering::SeqCst) {
                    self.emit(SessionEvent::ConnectionEstablished);
                } else if self.connection_interrupted.swap(false, Ordering::SeqCst) {
                    self.emit(SessionEvent::ConnectionRestored);
                }
                if self.transport.signaling_state() == SignalingState::Stable
                    && !self.was_connected.swap(true, Ordering::SeqCst)
                {
                    self.emit(SessionEvent::MediaSessionEstablished);
                }
            }
            IceConnectionState::Disconnected | IceConnectionState::Failed => {
                if self.connection_established.load(Ordering::SeqCst)
                    && !self.connection_interrupted.swap(true, Ordering::SeqCst)
                {
                    self.emit(SessionEvent::ConnectionInterrupted);
                }
            }
            _ => {}
        }
    }

    /// Flush accumulated local candidates as one transport-info, grouped by
    /// content in discovery order, with ICE credentials and fingerprint
    /// pulled from the stored local description.
    async fn flush_candidate_batch(&self, pending: &mut Vec<LocalCandidate>) {
        if pending.is_empty() {
            return;
        }
        let batch = std::mem::take(pending);
        let total = batch.len();

        let mut groups: Vec<(ContentName, Vec<IceCandidate>)> = Vec::new();
        for item in batch {
            match groups.iter_mut().find(|(name, _)| *name == item.content) {
                Some((_, list)) => list.push(item.candidate),
                None => groups.push((item.content, vec![item.candidate])),
            }
        }

        let mut payload = JinglePayload::new(JingleAction::TransportInfo, self.sid.clone())
            .with_initiator(self.initiator_id().clone());
        for (name, candidates) in groups {
            let (ice, fingerprint) = self
                .transport
                .local_section_info(&name)
                .await
                .unwrap_or((None, None));
            let mut transport = IceTransport::new();
            if let Some(params) = ice {
                transport = transport.with_parameters(params);
            }
            if let Some(fingerprint) = fingerprint {
                transport = transport.with_fingerprint(fingerprint);
            }
            for candidate in candidates {
                transport = transport.add_candidate(candidate);
            }
            payload = payload.add_content(Content::new(Creator::Initiator, name).with_transport(transport));
        }

        debug!("sending {} buffered candidate(s) for session {}", total, self.sid);
        self.spawn_send(payload, "transport-info");
    }

    // ---- task bodies, run on the serial queue ----

    async fn run_invite(&self, tracks: Vec<LocalTrack>) -> Result<()> {
        if self.ended().await {
            debug!("session {} already ended, discarding invite", self.sid);
            return Ok(());
        }
        for track in tracks {
            self.transport.add_local_track(track).await?;
        }
        let offer = self.transport.create_offer().await?;
        self.transport.apply_local_description(offer).await?;

        let mut payload = JinglePayload::new(JingleAction::SessionInitiate, self.sid.clone())
            .with_initiator(self.local.clone());
        for content in self.local_contents().await {
            payload = payload.add_content(content);
        }
        self.send_awaited(&payload).await
    }

    async fn run_accept_offer(
        &self,
        offer: SessionDescription,
        tracks: Vec<LocalTrack>,
    ) -> Result<()> {
        if self.ended().await {
            debug!("session {} already ended, discarding accept", self.sid);
            return Ok(());
        }
        self.renegotiation_preconditions(true).await?;
        for track in tracks {
            self.transport.add_local_track(track).await?;
        }
        self.transport.stage_remote_description(offer).await;
        self.offer_answer_exchange().await?;
        self.maybe_activate().await;

        let mut payload = JinglePayload::new(JingleAction::SessionAccept, self.sid.clone())
            .with_initiator(self.peer.clone())
            .with_responder(self.local.clone());
        for content in self.local_contents().await {
            payload = payload.add_content(content);
        }
        match self.send_awaited(&payload).await {
            Err(SessionError::Timeout) => {
                self.emit(SessionEvent::AcceptTimeout);
                Err(SessionError::AcceptTimeout)
            }
            other => other,
        }
    }

    async fn run_renegotiate(
        &self,
        remote: Option<SessionDescription>,
        tracks: Vec<LocalTrack>,
    ) -> Result<()> {
        if self.ended().await {
            debug!("session {} already ended, discarding renegotiation", self.sid);
            return Ok(());
        }
        self.renegotiation_preconditions(remote.is_some()).await?;
        for track in tracks {
            self.transport.add_local_track(track).await?;
        }
        if let Some(description) = remote {
            self.transport.stage_remote_description(description).await;
        }
        self.offer_answer_exchange().await?;
        self.maybe_activate().await;
        Ok(())
    }

    async fn run_replace_track(
        &self,
        old: Option<TrackId>,
        new: Option<LocalTrack>,
    ) -> Result<()> {
        if self.ended().await {
            debug!("session {} already ended, discarding track swap", self.sid);
            return Ok(());
        }
        let is_video = new.as_ref().map(|t| t.kind == MediaKind::Video).unwrap_or(false);
        let outcome = self.transport.replace_local_track(old.as_ref(), new).await?;

        if outcome == TrackSwapOutcome::RenegotiationNeeded
            && *self.state.read().await == SessionState::Active
        {
            self.renegotiation_preconditions(false).await?;
            self.offer_answer_exchange().await?;
        }

        if is_video {
            if let Some(settings) = *self.sender_video_settings.read().await {
                self.transport.set_sender_video_settings(settings).await?;
            }
        }
        Ok(())
    }

    async fn run_apply_candidates(
        &self,
        candidates: Vec<(ContentName, IceCandidate)>,
    ) -> Result<()> {
        if self.ended().await || self.transport.is_closed() {
            debug!("session {} closed, dropping {} candidate(s)", self.sid, candidates.len());
            return Ok(());
        }
        for (content, candidate) in &candidates {
            // One bad candidate must not sink the rest of the batch.
            if let Err(error) = self.transport.add_remote_candidate(content, candidate).await {
                warn!("failed to apply remote candidate for {}: {}", content, error);
            }
        }
        Ok(())
    }

    async fn run_add_remote_sources(&self, contents: Vec<Content>) -> Result<()> {
        if self.ended().await {
            return Ok(());
        }
        let added = self.transport.merge_remote_sources(&contents).await;
        if added == 0 {
            return Ok(());
        }
        debug!("session {} learned {} new remote source(s)", self.sid, added);
        self.renegotiation_preconditions(false).await?;
        self.offer_answer_exchange().await
    }

    async fn run_remove_remote_sources(&self, contents: Vec<Content>) -> Result<()> {
        if self.ended().await {
            return Ok(());
        }
        let removed = self.transport.remove_remote_sources(&contents).await;
        if removed == 0 {
            return Ok(());
        }
        debug!("session {} dropped {} remote source(s)", self.sid, removed);
        self.renegotiation_preconditions(false).await?;
        self.offer_answer_exchange().await
    }

    async fn run_replace_transport(&self, transport: IceTransport) -> Result<()> {
        if self.ended().await {
            return Ok(());
        }
        self.transport.replace_remote_transport(&transport).await?;
        self.transport.restart_ice().await?;
        self.renegotiation_preconditions(false).await?;
        self.offer_answer_exchange().await
    }
}

struct SessionTaskRunner {
    inner: Arc<SessionInner>,
}

#[async_trait]
impl TaskExecutor<SessionTask, SessionError> for SessionTaskRunner {
    async fn execute(&mut self, task: SessionTask) -> Result<()> {
        match task {
            SessionTask::Invite { tracks } => self.inner.run_invite(tracks).await,
            SessionTask::AcceptOffer { offer, tracks } => {
                self.inner.run_accept_offer(offer, tracks).await
            }
            SessionTask::Renegotiate { remote, tracks } => {
                self.inner.run_renegotiate(remote, tracks).await
            }
            SessionTask::ReplaceTrack { old, new } => self.inner.run_replace_track(old, new).await,
            SessionTask::ApplyCandidates { candidates } => {
                self.inner.run_apply_candidates(candidates).await
            }
            SessionTask::AddRemoteSources { contents } => {
                self.inner.run_add_remote_sources(contents).await
            }
            SessionTask::RemoveRemoteSources { contents } => {
                self.inner.run_remove_remote_sources(contents).await
            }
            SessionTask::ReplaceTransport { transport } => {
                self.inner.run_replace_transport(transport).await
            }
            SessionTask::Close => {
                self.inner.transport.close().await;
                Ok(())
            }
        }
    }
}

fn spawn_engine_pump(inner: Arc<SessionInner>, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    tokio::spawn(async move {
        let mut pending: Vec<LocalCandidate> = Vec::new();
        let mut deadline: Option<Instant> = None;
        loop {
            let event = if let Some(at) = deadline {
                tokio::select! {
                    event = events.recv() => event,
                    _ = tokio::time::sleep_until(at) => {
                        inner.flush_candidate_batch(&mut pending).await;
                        deadline = None;
                        continue;
                    }
                }
            } else {
                events.recv().await
            };
            let Some(event) = event else { break };

            match event {
                EngineEvent::CandidateDiscovered(Some(candidate)) => {
                    {
                        let mut started = inner.gathering_started.write().await;
                        if started.is_none() {
                            *started = Some(Instant::now());
                        }
                    }
                    pending.push(candidate);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + inner.config.candidate_batch_window);
                    }
                }
                EngineEvent::CandidateDiscovered(None) => {
                    // End-of-candidates marker: latch it, never transmit it.
                    if !inner.last_candidate_sent.swap(true, Ordering::SeqCst) {
                        *inner.gathering_completed.write().await = Some(Instant::now());
                        debug!("session {} finished gathering candidates", inner.sid);
                    }
                }
                EngineEvent::IceConnectionStateChanged(state) => {
                    inner.handle_ice_state(state).await;
                }
                EngineEvent::SignalingStateChanged(state) => {
                    debug!("session {} signaling state: {}", inner.sid, state);
                }
            }
        }
        debug!("engine event stream for session {} ended", inner.sid);
    });
}

fn spawn_transport_pump(
    inner: Arc<SessionInner>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::RemoteTrackAdded(track) => {
                    inner.emit(SessionEvent::RemoteTrackAdded { track });
                }
                TransportEvent::RemoteTrackRemoved { owner, media } => {
                    inner.emit(SessionEvent::RemoteTrackRemoved { owner, media });
                }
            }
        }
    });
}

/// One Jingle negotiation with one peer.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct JingleSession {
    inner: Arc<SessionInner>,
    queue: SerialWorkQueue<SessionTask, SessionError>,
}

impl JingleSession {
    /// Build a session: creates the media transport through the factory and
    /// wires its event streams. Returns the session together with the
    /// receiver for its event channel.
    pub async fn new(
        params: SessionParams,
        factory: &dyn MediaTransportFactory,
        signaling: Arc<dyn SignalingTransport>,
        presence: Arc<dyn PresenceDirectory>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (engine, engine_events) = factory.create(&params.config).await?;
        let binding = Arc::new(crate::binding::SignalingBinding::new());
        let (transport, transport_events) = MediaTransport::new(engine, binding, presence);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SessionInner {
            sid: params.sid,
            local: params.local,
            peer: params.peer,
            role: params.role,
            topology: params.topology,
            config: params.config,
            transport: Arc::new(transport),
            signaling,
            state: RwLock::new(SessionState::Pending),
            was_connected: AtomicBool::new(false),
            connection_established: AtomicBool::new(false),
            connection_interrupted: AtomicBool::new(false),
            last_candidate_sent: AtomicBool::new(false),
            gathering_started: RwLock::new(None),
            gathering_completed: RwLock::new(None),
            bridge_session_id: RwLock::new(None),
            local_video_active: AtomicBool::new(true),
            remote_video_active: AtomicBool::new(true),
            receiver_max_height: RwLock::new(None),
            sender_video_settings: RwLock::new(None),
            events: events_tx,
        });

        spawn_engine_pump(Arc::clone(&inner), engine_events);
        spawn_transport_pump(Arc::clone(&inner), transport_events);

        let queue = SerialWorkQueue::spawn(
            format!("session-{}", inner.sid),
            SessionTaskRunner { inner: Arc::clone(&inner) },
        );

        debug!(
            "created {} {} session {} with {}",
            inner.role, inner.topology, inner.sid, inner.peer
        );
        Ok((Self { inner, queue }, events_rx))
    }

    // ---- identity ----

    pub fn id(&self) -> &SessionId {
        &self.inner.sid
    }

    pub fn local(&self) -> &EndpointId {
        &self.inner.local
    }

    pub fn peer(&self) -> &EndpointId {
        &self.inner.peer
    }

    pub fn role(&self) -> SessionRole {
        self.inner.role
    }

    pub fn topology(&self) -> SessionTopology {
        self.inner.topology
    }

    pub fn is_p2p(&self) -> bool {
        self.inner.topology.is_p2p()
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.inner.state.read().await
    }

    /// Relay correlation id from the most recent relay-initiated offer.
    pub async fn bridge_session_id(&self) -> Option<String> {
        self.inner.bridge_session_id.read().await.clone()
    }

    pub async fn set_bridge_session_id(&self, id: Option<String>) {
        *self.inner.bridge_session_id.write().await = id;
    }

    /// How long candidate gathering took, once it has completed.
    pub async fn ice_gathering_duration(&self) -> Option<Duration> {
        let started = (*self.inner.gathering_started.read().await)?;
        let completed = (*self.inner.gathering_completed.read().await)?;
        Some(completed.duration_since(started))
    }

    // ---- introspection ----

    /// Surfaced remote track for one participant and media kind.
    pub fn remote_track(&self, owner: &EndpointId, media: MediaKind) -> Option<RemoteTrack> {
        self.inner.transport.remote_track(owner, media)
    }

    pub fn remote_track_count(&self) -> usize {
        self.inner.transport.remote_track_count()
    }

    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        self.inner.transport.local_tracks()
    }

    /// Owner of a remote source, when bound.
    pub fn source_owner(&self, ssrc: u32) -> Option<EndpointId> {
        self.inner.transport.binding().owner_of(ssrc)
    }

    pub async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.transport.local_description().await
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.transport.remote_description().await
    }

    // ---- negotiation operations ----

    /// Start the session towards the peer: add initial tracks, produce the
    /// local offer, send session-initiate. Initiator only.
    pub async fn invite(&self, tracks: Vec<LocalTrack>) -> Result<()> {
        if self.inner.role != SessionRole::Initiator {
            return Err(SessionError::initiator_only("invite"));
        }
        if self.inner.ended().await {
            debug!("invite on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        self.run_task("invite", SessionTask::Invite { tracks }).await
    }

    /// Accept a received offer: add initial tracks, apply the offer, produce
    /// and apply the answer, send session-accept. Responder only.
    ///
    /// Resolves once the entire chain, the session-accept exchange included,
    /// has completed. A response timeout surfaces as
    /// [`SessionError::AcceptTimeout`] alongside its session event.
    pub async fn accept_offer(
        &self,
        offer: SessionDescription,
        tracks: Vec<LocalTrack>,
    ) -> Result<()> {
        if self.inner.role != SessionRole::Responder {
            return Err(SessionError::responder_only("accept_offer"));
        }
        if self.inner.ended().await {
            debug!("accept_offer on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        self.run_task("accept-offer", SessionTask::AcceptOffer { offer, tracks }).await
    }

    /// Apply the peer's answer to our outstanding offer. Initiator only.
    pub async fn set_answer(&self, answer: SessionDescription) -> Result<()> {
        if self.inner.role != SessionRole::Initiator {
            return Err(SessionError::initiator_only("set_answer"));
        }
        if self.inner.ended().await {
            debug!("set_answer on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        self.run_task(
            "set-answer",
            SessionTask::Renegotiate { remote: Some(answer), tracks: Vec::new() },
        )
        .await
    }

    /// Run an offer/answer cycle, optionally staging a fresh remote
    /// description and adding extra local tracks first.
    pub async fn renegotiate(
        &self,
        remote: Option<SessionDescription>,
        tracks: Vec<LocalTrack>,
    ) -> Result<()> {
        if self.inner.ended().await {
            debug!("renegotiate on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        self.run_task("renegotiate", SessionTask::Renegotiate { remote, tracks }).await
    }

    /// Swap a local track. When the engine reports that the swap needs a
    /// renegotiation and the session is active, one cycle runs before this
    /// resolves; sender video constraints are re-applied for video tracks.
    pub async fn replace_track(
        &self,
        old: Option<TrackId>,
        new: Option<LocalTrack>,
    ) -> Result<()> {
        if self.inner.ended().await {
            debug!("replace_track on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        self.run_task("replace-track", SessionTask::ReplaceTrack { old, new }).await
    }

    /// Queue a batch of remote candidates from a transport-info.
    ///
    /// Batches with no usable candidate, and batches arriving after the
    /// session or transport closed, are dropped with a log line.
    pub async fn add_ice_candidates(&self, contents: &[Content]) {
        if self.inner.ended().await || self.inner.transport.is_closed() {
            debug!("dropping candidates for closed session {}", self.inner.sid);
            return;
        }
        let (allow_udp, allow_tcp) = self.inner.config.candidate_protocols();
        let mut candidates = Vec::new();
        for content in contents {
            let Some(transport) = &content.transport else { continue };
            for candidate in transport.usable_candidates(allow_udp, allow_tcp) {
                candidates.push((content.name.clone(), candidate.clone()));
            }
        }
        if candidates.is_empty() {
            warn!(
                "transport-info for session {} carried no usable candidates, dropping",
                self.inner.sid
            );
            return;
        }
        debug!(
            "queueing {} remote candidate(s) for session {}",
            candidates.len(),
            self.inner.sid
        );
        if self.queue.push(SessionTask::ApplyCandidates { candidates }).await.is_err() {
            debug!("work queue for session {} is closed, dropping candidates", self.inner.sid);
        }
    }

    /// Merge a source-add advertisement and renegotiate.
    pub async fn add_remote_sources(&self, contents: Vec<Content>) -> Result<()> {
        if self.inner.ended().await {
            return Ok(());
        }
        self.run_task("source-add", SessionTask::AddRemoteSources { contents }).await
    }

    /// Apply a source-remove advertisement and renegotiate.
    pub async fn remove_remote_sources(&self, contents: Vec<Content>) -> Result<()> {
        if self.inner.ended().await {
            return Ok(());
        }
        self.run_task("source-remove", SessionTask::RemoveRemoteSources { contents }).await
    }

    /// Handle an inbound transport-replace. With ICE restart enabled the
    /// remote transport block is swapped and a new generation gathered;
    /// otherwise the session terminates with a failed-transport reason.
    pub async fn replace_transport(&self, transport: IceTransport) -> Result<()> {
        if self.inner.ended().await {
            return Ok(());
        }
        if !self.inner.config.enable_ice_restart {
            warn!(
                "transport-replace for session {} but ice restart is disabled, terminating",
                self.inner.sid
            );
            self.terminate(TerminateReason::FailedTransport, Some("ice restart not supported"), true)
                .await;
            return Ok(());
        }
        self.run_task("transport-replace", SessionTask::ReplaceTransport { transport }).await
    }

    // ---- media preferences ----

    /// Announce whether local video is being sent. On an active direct
    /// session this sends a content-modify; otherwise the direction is
    /// recorded for the next offer.
    pub async fn set_local_video_active(&self, active: bool) -> Result<()> {
        if self.inner.ended().await {
            debug!("video toggle on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        let previous = self.inner.local_video_active.swap(active, Ordering::SeqCst);
        if previous == active {
            return Ok(());
        }
        if self.inner.topology.is_p2p() && self.state().await == SessionState::Active {
            self.inner.send_video_content_modify().await;
        } else {
            let senders = if active { Senders::Both } else { Senders::None };
            self.inner.transport.modify_local_senders(&ContentName::video(), senders).await;
        }
        Ok(())
    }

    /// Whether the peer currently announces video as active.
    pub fn remote_video_active(&self) -> bool {
        self.inner.remote_video_active.load(Ordering::SeqCst)
    }

    /// Bound the resolution requested from the remote side. Direct sessions
    /// store the preference and signal it via content-modify once active;
    /// bridged sessions delegate to the relay's bandwidth-allocation path.
    pub async fn set_receiver_video_constraint(&self, max_height: Option<u32>) -> Result<()> {
        if self.inner.ended().await {
            debug!("receiver constraint on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        match self.inner.topology {
            SessionTopology::PeerToPeer => {
                *self.inner.receiver_max_height.write().await = max_height;
                if self.state().await == SessionState::Active {
                    self.inner.send_video_content_modify().await;
                }
                Ok(())
            }
            SessionTopology::Bridged => {
                self.inner.transport.set_receiver_video_constraint(max_height).await
            }
        }
    }

    /// Apply sender-side encoding constraints; re-applied automatically
    /// after video track swaps.
    pub async fn set_sender_video_settings(&self, settings: SenderVideoSettings) -> Result<()> {
        if self.inner.ended().await {
            debug!("sender settings on ended session {}, ignoring", self.inner.sid);
            return Ok(());
        }
        *self.inner.sender_video_settings.write().await = Some(settings);
        self.inner.transport.set_sender_video_settings(settings).await
    }

    /// Apply an inbound content-modify: updates the peer's video direction
    /// and any sender constraint it requests. Malformed payloads are dropped
    /// with a warning.
    pub async fn handle_content_modify(&self, content: &Content) {
        if self.inner.ended().await {
            return;
        }
        let Some(senders) = content.senders else {
            warn!("content-modify for session {} without senders, dropping", self.inner.sid);
            return;
        };
        let peer_is_initiator = self.inner.role == SessionRole::Responder;
        let remote_sends = match senders {
            Senders::Both => true,
            Senders::None => false,
            Senders::Initiator => peer_is_initiator,
            Senders::Responder => !peer_is_initiator,
        };
        if content.name == ContentName::video() {
            self.inner.remote_video_active.store(remote_sends, Ordering::SeqCst);
            debug!(
                "session {} remote video is now {}",
                self.inner.sid,
                if remote_sends { "active" } else { "inactive" }
            );
        }
        if let Some(height) = content.description.as_ref().and_then(|d| d.max_frame_height) {
            let settings = SenderVideoSettings { max_height: Some(height) };
            *self.inner.sender_video_settings.write().await = Some(settings);
            if let Err(error) = self.inner.transport.set_sender_video_settings(settings).await {
                warn!("failed to apply sender constraint from content-modify: {}", error);
            }
        }
    }

    // ---- teardown ----

    /// End the session. Marks it ended immediately, optionally announces a
    /// session-terminate, lets in-flight queue work drain, then closes the
    /// transport. Idempotent.
    pub async fn terminate(
        &self,
        reason: TerminateReason,
        message: Option<&str>,
        announce: bool,
    ) {
        {
            let mut state = self.inner.state.write().await;
            if *state == SessionState::Ended {
                return;
            }
            *state = SessionState::Ended;
        }
        debug!("terminating session {} ({})", self.inner.sid, reason);

        if announce {
            let mut reason_element = Reason::new(reason);
            if let Some(text) = message {
                reason_element = reason_element.with_text(text);
            }
            let mut payload = JinglePayload::new(JingleAction::SessionTerminate, self.inner.sid.clone())
                .with_initiator(self.inner.initiator_id().clone())
                .with_reason(reason_element);
            if let Some(id) = self.inner.bridge_session_id.read().await.clone() {
                payload = payload.with_bridge_session(id);
            }
            self.inner.spawn_send(payload, "session-terminate");
        }

        // In-flight work drains first; the transport closes behind it.
        let _ = self.queue.push(SessionTask::Close).await;
        self.queue.close().await;
        self.inner.emit(SessionEvent::Ended { reason });
    }

    async fn run_task(&self, label: &'static str, task: SessionTask) -> Result<()> {
        let completion = match self.queue.push_awaited(task).await {
            Ok(receiver) => receiver,
            Err(_closed) => {
                debug!("work queue for session {} is closed, dropping {}", self.inner.sid, label);
                return Ok(());
            }
        };
        match completion.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::QueueClosed),
        }
    }
}
