//! In-memory fakes for tests and examples.
//!
//! The negotiation core never touches a real WebRTC engine or XMPP stream
//! directly; everything goes through [`SessionDescriptionOps`],
//! [`MediaTransportFactory`], [`SignalingTransport`] and
//! [`PresenceDirectory`]. The fakes here implement those seams with
//! recording and scripted-failure hooks so negotiation behavior can be
//! asserted without any network or media stack.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use rmeet_jingle_core::{
    ContentName, EndpointId, Fingerprint, IceCandidate, IceParameters, IqFailure, JingleAction,
    JinglePayload, MediaKind, MediaSection, SessionDescription, SourceEntry, StanzaId,
};

use crate::binding::{PeerMediaInfo, PresenceDirectory};
use crate::config::SessionConfig;
use crate::engine::{
    EngineError, EngineEvent, IceConnectionState, LocalCandidate, LocalTrack,
    MediaTransportFactory, SenderVideoSettings, SessionDescriptionOps, SignalingState, TrackId,
    TrackSwapOutcome,
};
use crate::signaling::SignalingTransport;

// Poison-tolerant lock; a panicked test thread must not wedge the rest.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scriptable in-memory media engine.
///
/// Mimics the WebRTC offer/answer machine closely enough for negotiation
/// ordering to be observable: descriptions move the signaling state the way
/// a real engine would, and producing an answer without an applied remote
/// offer is an error. Every call is appended to a log for assertions.
pub struct FakeMediaEngine {
    calls: Mutex<Vec<String>>,
    state: Mutex<SignalingState>,
    tracks: Mutex<Vec<LocalTrack>>,
    track_ssrcs: Mutex<HashMap<TrackId, u32>>,
    next_ssrc: AtomicU32,
    applied_candidates: Mutex<Vec<(ContentName, IceCandidate)>>,
    receiver_constraint: Mutex<Option<u32>>,
    sender_settings: Mutex<Option<SenderVideoSettings>>,
    swap_outcome: Mutex<TrackSwapOutcome>,
    fail_operations: Mutex<HashSet<String>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl FakeMediaEngine {
    /// Build an engine and the event receiver a session would own.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(SignalingState::Stable),
            tracks: Mutex::new(Vec::new()),
            track_ssrcs: Mutex::new(HashMap::new()),
            next_ssrc: AtomicU32::new(5000),
            applied_candidates: Mutex::new(Vec::new()),
            receiver_constraint: Mutex::new(None),
            sender_settings: Mutex::new(None),
            swap_outcome: Mutex::new(TrackSwapOutcome::Swapped),
            fail_operations: Mutex::new(HashSet::new()),
            events,
        });
        (engine, events_rx)
    }

    /// Ordered log of every operation invoked on this engine.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Remote candidates that reached the engine, in application order.
    pub fn applied_candidates(&self) -> Vec<(ContentName, IceCandidate)> {
        lock(&self.applied_candidates).clone()
    }

    /// Last receiver constraint applied through the bandwidth path.
    pub fn receiver_constraint(&self) -> Option<u32> {
        *lock(&self.receiver_constraint)
    }

    /// Last sender settings applied.
    pub fn sender_settings(&self) -> Option<SenderVideoSettings> {
        *lock(&self.sender_settings)
    }

    /// Make the named operation fail until cleared.
    pub fn fail_operation(&self, operation: &str) {
        lock(&self.fail_operations).insert(operation.to_string());
    }

    /// Script the outcome of the next track swaps.
    pub fn set_swap_outcome(&self, outcome: TrackSwapOutcome) {
        *lock(&self.swap_outcome) = outcome;
    }

    /// Inject an engine event into the owning session's pump.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_ice_state(&self, state: IceConnectionState) {
        self.emit(EngineEvent::IceConnectionStateChanged(state));
    }

    pub fn discover_candidate(&self, content: ContentName, candidate: IceCandidate) {
        self.emit(EngineEvent::CandidateDiscovered(Some(LocalCandidate {
            content,
            candidate,
        })));
    }

    pub fn end_of_candidates(&self) {
        self.emit(EngineEvent::CandidateDiscovered(None));
    }

    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    fn check_fail(&self, operation: &str) -> Result<(), EngineError> {
        if lock(&self.fail_operations).contains(operation) {
            Err(EngineError::new(format!("scripted failure in {operation}")))
        } else {
            Ok(())
        }
    }

    fn ssrc_for(&self, track: &LocalTrack) -> u32 {
        let mut map = lock(&self.track_ssrcs);
        *map.entry(track.id.clone())
            .or_insert_with(|| self.next_ssrc.fetch_add(1, Ordering::SeqCst))
    }

    /// Description shaped like a conferencing offer: one audio and one video
    /// section with stable ICE credentials, local sources where tracks
    /// exist.
    fn build_description(&self) -> SessionDescription {
        let tracks = lock(&self.tracks).clone();
        let mut description = SessionDescription::new();
        for (name, media) in [
            (ContentName::audio(), MediaKind::Audio),
            (ContentName::video(), MediaKind::Video),
        ] {
            let mut section = MediaSection::new(name, media);
            section.ice = Some(IceParameters::new("loc4l", "s3cr3tpwd"));
            section.fingerprint = Some(Fingerprint::new(
                "sha-256",
                "02:1A:CC:54:27:AB:EB:9C:53:3F:3E:4B:65:2E:7D:46:3F:54:42:CD:54:F1:7A:03:A2:7D:F9:B0:7F:46:19:B2",
            ));
            for track in tracks.iter().filter(|t| t.kind == media) {
                section.sources.push(SourceEntry::new(self.ssrc_for(track).to_string()));
            }
            description = description.add_section(section);
        }
        description
    }

    fn transition(&self, applying_local: bool) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        let next = match (*state, applying_local) {
            (SignalingState::Closed, _) => return Err(EngineError::new("engine is closed")),
            (SignalingState::Stable, true) => SignalingState::HaveLocalOffer,
            (SignalingState::HaveRemoteOffer, true) => SignalingState::Stable,
            (SignalingState::HaveLocalOffer, true) => SignalingState::HaveLocalOffer,
            (SignalingState::Stable, false) => SignalingState::HaveRemoteOffer,
            (SignalingState::HaveLocalOffer, false) => SignalingState::Stable,
            (SignalingState::HaveRemoteOffer, false) => SignalingState::HaveRemoteOffer,
        };
        if next != *state {
            *state = next;
            let _ = self.events.send(EngineEvent::SignalingStateChanged(next));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionDescriptionOps for FakeMediaEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.record("create_offer");
        self.check_fail("create_offer")?;
        if self.signaling_state() == SignalingState::Closed {
            return Err(EngineError::new("engine is closed"));
        }
        Ok(self.build_description())
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.record("create_answer");
        self.check_fail("create_answer")?;
        let state = self.signaling_state();
        if state != SignalingState::HaveRemoteOffer {
            return Err(EngineError::new(format!("create_answer while {state}")));
        }
        Ok(self.build_description())
    }

    async fn set_local_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record("set_local_description");
        self.check_fail("set_local_description")?;
        self.transition(true)
    }

    async fn set_remote_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record("set_remote_description");
        self.check_fail("set_remote_description")?;
        self.transition(false)
    }

    async fn add_ice_candidate(
        &self,
        content: &ContentName,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError> {
        self.record(format!("add_ice_candidate:{content}"));
        self.check_fail("add_ice_candidate")?;
        lock(&self.applied_candidates).push((content.clone(), candidate.clone()));
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        *lock(&self.state)
    }

    async fn add_track(&self, track: LocalTrack) -> Result<(), EngineError> {
        self.record(format!("add_track:{}", track.kind));
        self.check_fail("add_track")?;
        lock(&self.tracks).push(track);
        Ok(())
    }

    async fn remove_track(&self, track: &TrackId) -> Result<(), EngineError> {
        self.record("remove_track");
        self.check_fail("remove_track")?;
        lock(&self.tracks).retain(|t| &t.id != track);
        Ok(())
    }

    async fn replace_track(
        &self,
        old: Option<&TrackId>,
        new: Option<&LocalTrack>,
    ) -> Result<TrackSwapOutcome, EngineError> {
        self.record("replace_track");
        self.check_fail("replace_track")?;
        let mut tracks = lock(&self.tracks);
        if let Some(old_id) = old {
            tracks.retain(|t| &t.id != old_id);
        }
        if let Some(track) = new {
            tracks.push(track.clone());
        }
        Ok(*lock(&self.swap_outcome))
    }

    async fn set_receiver_video_constraint(
        &self,
        max_height: Option<u32>,
    ) -> Result<(), EngineError> {
        self.record("set_receiver_video_constraint");
        self.check_fail("set_receiver_video_constraint")?;
        *lock(&self.receiver_constraint) = max_height;
        Ok(())
    }

    async fn set_sender_video_settings(
        &self,
        settings: SenderVideoSettings,
    ) -> Result<(), EngineError> {
        self.record("set_sender_video_settings");
        self.check_fail("set_sender_video_settings")?;
        *lock(&self.sender_settings) = Some(settings);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<(), EngineError> {
        self.record("restart_ice");
        self.check_fail("restart_ice")
    }

    async fn close(&self) {
        self.record("close");
        *lock(&self.state) = SignalingState::Closed;
    }
}

/// Factory handing out [`FakeMediaEngine`]s, keeping every built engine and
/// the config it was built with for later inspection.
#[derive(Default)]
pub struct FakeEngineFactory {
    built: Mutex<Vec<Arc<FakeMediaEngine>>>,
    configs: Mutex<Vec<SessionConfig>>,
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines built so far, in creation order.
    pub fn engines(&self) -> Vec<Arc<FakeMediaEngine>> {
        lock(&self.built).clone()
    }

    /// Most recently built engine.
    pub fn latest(&self) -> Option<Arc<FakeMediaEngine>> {
        lock(&self.built).last().cloned()
    }

    /// Configs passed to `create`, in creation order.
    pub fn configs(&self) -> Vec<SessionConfig> {
        lock(&self.configs).clone()
    }
}

#[async_trait]
impl MediaTransportFactory for FakeEngineFactory {
    async fn create(
        &self,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn SessionDescriptionOps>, mpsc::UnboundedReceiver<EngineEvent>), EngineError>
    {
        let (engine, events) = FakeMediaEngine::new();
        lock(&self.built).push(Arc::clone(&engine));
        lock(&self.configs).push(config.clone());
        Ok((engine, events))
    }
}

/// Recording signaling transport with scriptable per-action failures.
pub struct FakeSignalingTransport {
    sent: tokio::sync::Mutex<Vec<(EndpointId, JinglePayload)>>,
    acknowledged: tokio::sync::Mutex<Vec<StanzaId>>,
    failures: tokio::sync::Mutex<HashMap<JingleAction, IqFailure>>,
}

impl FakeSignalingTransport {
    pub fn new() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
            acknowledged: tokio::sync::Mutex::new(Vec::new()),
            failures: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Payloads sent so far.
    pub async fn sent(&self) -> Vec<JinglePayload> {
        self.sent.lock().await.iter().map(|(_, p)| p.clone()).collect()
    }

    /// Actions sent so far, in order.
    pub async fn sent_actions(&self) -> Vec<JingleAction> {
        self.sent.lock().await.iter().map(|(_, p)| p.action).collect()
    }

    /// Payloads of one action.
    pub async fn sent_with_action(&self, action: JingleAction) -> Vec<JinglePayload> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(_, p)| p.action == action)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Stanza ids acknowledged so far.
    pub async fn acknowledged(&self) -> Vec<StanzaId> {
        self.acknowledged.lock().await.clone()
    }

    /// Fail the next send of `action` with `failure`. One-shot.
    pub async fn fail_next(&self, action: JingleAction, failure: IqFailure) {
        self.failures.lock().await.insert(action, failure);
    }

    /// Poll until a payload with `action` has been sent, or give up after
    /// `window`.
    pub async fn wait_for_sent(&self, action: JingleAction, window: Duration) -> Option<JinglePayload> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            if let Some(payload) = self.sent_with_action(action).await.into_iter().next() {
                return Some(payload);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Default for FakeSignalingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingTransport for FakeSignalingTransport {
    async fn send_iq(&self, to: &EndpointId, payload: &JinglePayload) -> Result<(), IqFailure> {
        if let Some(failure) = self.failures.lock().await.remove(&payload.action) {
            return Err(failure);
        }
        self.sent.lock().await.push((to.clone(), payload.clone()));
        Ok(())
    }

    async fn acknowledge(&self, stanza: &StanzaId) {
        self.acknowledged.lock().await.push(stanza.clone());
    }
}

/// Presence directory backed by a plain map.
#[derive(Default)]
pub struct FakePresenceDirectory {
    entries: DashMap<(EndpointId, MediaKind), PeerMediaInfo>,
}

impl FakePresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: EndpointId, media: MediaKind, info: PeerMediaInfo) {
        self.entries.insert((id, media), info);
    }
}

impl PresenceDirectory for FakePresenceDirectory {
    fn peer_media_info(&self, id: &EndpointId, media: MediaKind) -> Option<PeerMediaInfo> {
        self.entries.get(&(id.clone(), media)).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn engine_enforces_offer_answer_causality() {
        let (engine, _events) = FakeMediaEngine::new();

        // An answer without an applied remote offer is a protocol bug.
        assert!(engine.create_answer().await.is_err());

        let offer = engine.create_offer().await.expect("offer");
        engine.set_remote_description(offer).await.expect("remote");
        assert_eq!(engine.signaling_state(), SignalingState::HaveRemoteOffer);

        let answer = engine.create_answer().await.expect("answer");
        engine.set_local_description(answer).await.expect("local");
        assert_eq!(engine.signaling_state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn scripted_failures_hit_the_named_operation() {
        let (engine, _events) = FakeMediaEngine::new();
        engine.fail_operation("create_offer");
        assert!(engine.create_offer().await.is_err());
        assert!(engine.add_track(LocalTrack::new(MediaKind::Audio)).await.is_ok());
    }

    #[tokio::test]
    async fn signaling_failures_are_one_shot() {
        let transport = FakeSignalingTransport::new();
        transport.fail_next(JingleAction::SessionAccept, IqFailure::Timeout).await;

        let payload = JinglePayload::new(
            JingleAction::SessionAccept,
            rmeet_jingle_core::SessionId::new("s1"),
        );
        let to = EndpointId::new("room@muc/peer");
        assert_eq!(transport.send_iq(&to, &payload).await, Err(IqFailure::Timeout));
        assert_eq!(transport.send_iq(&to, &payload).await, Ok(()));
        assert_eq!(transport.sent().await.len(), 1);
    }
}
