//! Peer-to-peer switch policy and active-transport arbitration.
//!
//! The controller owns at most one bridged and one direct session at a
//! time. Eligibility for the direct path is re-evaluated on every
//! membership change once the local room join has completed: exactly one
//! other non-focus, non-gateway occupant must be present. When both sides
//! are eligible the lexicographically smaller endpoint id initiates and
//! the other side waits for the incoming session-initiate, so exactly one
//! direct session comes up.
//!
//! A leave-triggered eligibility (the third occupant just left) is
//! debounced with a settle timer so a page reload does not cause a direct
//! session to be built and immediately torn down. Direct-path ICE failure
//! falls back to the bridged session and is not retried until membership
//! changes again.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rmeet_jingle_core::{
    EndpointId, JingleAction, JinglePayload, Reason, SessionDescription, SessionId,
    TerminateReason,
};
use rmeet_session_core::{
    IceConnectionState, JingleSession, LocalTrack, MediaTransportFactory, PresenceDirectory,
    SessionEvent, SessionParams, SessionRole, SessionTopology, SignalingTransport,
};

use crate::config::ConferenceConfig;
use crate::error::Result;
use crate::events::{ConferenceEvent, ConferenceEventStream, ConferenceEvents};
use crate::roster::{Participant, RoomEvent, Roster};

/// What prompted a policy evaluation. Only a member leave defers the
/// resulting session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvalCause {
    RoomJoined,
    MemberChange,
    MemberLeft,
    TimerFired,
}

struct PolicyInner {
    config: ConferenceConfig,
    roster: Arc<Roster>,
    factory: Arc<dyn MediaTransportFactory>,
    signaling: Arc<dyn SignalingTransport>,
    local_id: RwLock<Option<EndpointId>>,
    local_tracks: RwLock<Vec<LocalTrack>>,
    bridged: RwLock<Option<JingleSession>>,
    p2p: RwLock<Option<JingleSession>>,
    p2p_active: AtomicBool,
    deferred_start: Mutex<Option<JoinHandle<()>>>,
    events: ConferenceEvents,
}

/// Conference orchestrator: membership-driven P2P policy, inbound call
/// adoption, and the decision which session carries outbound media.
#[derive(Clone)]
pub struct SessionPolicyController {
    inner: Arc<PolicyInner>,
}

impl SessionPolicyController {
    pub fn new(
        config: ConferenceConfig,
        factory: Arc<dyn MediaTransportFactory>,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(PolicyInner {
                config,
                roster: Arc::new(Roster::new()),
                factory,
                signaling,
                local_id: RwLock::new(None),
                local_tracks: RwLock::new(Vec::new()),
                bridged: RwLock::new(None),
                p2p: RwLock::new(None),
                p2p_active: AtomicBool::new(false),
                deferred_start: Mutex::new(None),
                events: ConferenceEvents::new(),
            }),
        }
    }

    // ---- observation ----

    pub fn subscribe(&self) -> ConferenceEventStream {
        self.inner.events.subscribe()
    }

    pub fn roster(&self) -> Arc<Roster> {
        Arc::clone(&self.inner.roster)
    }

    pub fn focus(&self) -> &EndpointId {
        &self.inner.config.focus
    }

    pub async fn local_id(&self) -> Option<EndpointId> {
        self.inner.local_id.read().await.clone()
    }

    pub fn is_p2p_active(&self) -> bool {
        self.inner.p2p_active.load(Ordering::SeqCst)
    }

    pub async fn bridged_session(&self) -> Option<JingleSession> {
        self.inner.bridged.read().await.clone()
    }

    pub async fn p2p_session(&self) -> Option<JingleSession> {
        self.inner.p2p.read().await.clone()
    }

    /// The session that should carry outbound media right now: the direct
    /// session once it has established media, the bridged one otherwise.
    pub async fn active_session(&self) -> Option<JingleSession> {
        if self.is_p2p_active() {
            if let Some(session) = self.inner.p2p.read().await.clone() {
                return Some(session);
            }
        }
        self.inner.bridged.read().await.clone()
    }

    /// Find the session owning a sid, for inbound routing.
    pub async fn session(&self, sid: &SessionId) -> Option<JingleSession> {
        for slot in [&self.inner.bridged, &self.inner.p2p] {
            if let Some(session) = slot.read().await.as_ref() {
                if session.id() == sid {
                    return Some(session.clone());
                }
            }
        }
        None
    }

    // ---- local media ----

    /// Tracks offered when this controller builds or answers a session.
    pub async fn set_local_tracks(&self, tracks: Vec<LocalTrack>) {
        *self.inner.local_tracks.write().await = tracks;
    }

    /// Forward a receive resolution cap to the active session.
    pub async fn set_receiver_video_constraint(&self, max_height: Option<u32>) -> Result<()> {
        match self.active_session().await {
            Some(session) => {
                session.set_receiver_video_constraint(max_height).await?;
                Ok(())
            }
            None => {
                debug!("no session to carry the receiver constraint yet");
                Ok(())
            }
        }
    }

    /// Announce local video mute state on every live session, so a later
    /// transport switch needs no catch-up signaling.
    pub async fn set_local_video_active(&self, active: bool) -> Result<()> {
        if let Some(session) = self.bridged_session().await {
            session.set_local_video_active(active).await?;
        }
        if let Some(session) = self.p2p_session().await {
            session.set_local_video_active(active).await?;
        }
        Ok(())
    }

    // ---- membership ----

    pub async fn handle_room_event(&self, event: RoomEvent) {
        match event {
            RoomEvent::RoomJoined { local_id } => {
                info!("joined the room as {local_id}");
                *self.inner.local_id.write().await = Some(local_id);
                self.evaluate(EvalCause::RoomJoined).await;
            }
            RoomEvent::MemberJoined(participant) => {
                debug!("member joined: {}", participant.id);
                self.inner.roster.upsert(participant.clone());
                self.inner
                    .events
                    .publish(ConferenceEvent::MemberJoined { participant });
                self.evaluate(EvalCause::MemberChange).await;
            }
            RoomEvent::MemberUpdated(participant) => {
                self.inner.roster.upsert(participant);
                self.evaluate(EvalCause::MemberChange).await;
            }
            RoomEvent::MemberLeft(id) => {
                debug!("member left: {id}");
                if self.inner.roster.remove(&id).is_some() {
                    self.inner.events.publish(ConferenceEvent::MemberLeft { id });
                }
                self.evaluate(EvalCause::MemberLeft).await;
            }
        }
    }

    /// Leave the conference: stop the settle timer and end both sessions.
    pub async fn close(&self) {
        self.cancel_deferred().await;
        let bridged = self.inner.bridged.write().await.take();
        let p2p = self.inner.p2p.write().await.take();
        let goodbye = |session: Option<JingleSession>| async move {
            if let Some(session) = session {
                session
                    .terminate(TerminateReason::Success, Some("leaving the conference"), true)
                    .await;
            }
        };
        futures::future::join(goodbye(bridged), goodbye(p2p)).await;
        self.deactivate_p2p();
    }

    // ---- P2P decision function ----

    fn evaluate(&self, cause: EvalCause) -> futures::future::BoxFuture<'_, ()> {
        Box::pin(async move {
        let Some(local) = self.local_id().await else {
            debug!("membership changed before the room join completed, policy deferred");
            return;
        };
        // Every evaluation supersedes a pending deferred start.
        self.cancel_deferred().await;

        let eligible = self.eligible_peer();
        let current_peer = self
            .inner
            .p2p
            .read()
            .await
            .as_ref()
            .map(|session| session.peer().clone());

        match (&eligible, &current_peer) {
            (Some(peer), Some(current)) if *current == peer.id => {
                debug!("direct session with {current} already in place");
                return;
            }
            (None, None) => return,
            _ => {}
        }

        if current_peer.is_some() {
            let (reason, why) = match &eligible {
                Some(_) => (TerminateReason::Gone, "direct peer changed"),
                None => (TerminateReason::Success, "switching back to the bridge"),
            };
            info!("stopping direct session: {why}");
            self.stop_p2p(reason, why).await;
        }

        let Some(peer) = eligible else { return };
        match local.cmp(&peer.id) {
            CmpOrdering::Equal => {
                warn!("local and peer endpoint ids compare equal, starting nothing");
            }
            CmpOrdering::Greater => {
                debug!("tie-break designates {} as initiator, waiting", peer.id);
            }
            CmpOrdering::Less => {
                if cause == EvalCause::MemberLeft {
                    self.arm_deferred().await;
                } else {
                    self.start_p2p(local, peer.id).await;
                }
            }
        }
        })
    }

    /// The sole non-focus occupant, when there is exactly one and it is
    /// not disqualified.
    fn eligible_peer(&self) -> Option<Participant> {
        if !self.inner.config.p2p.enabled {
            return None;
        }
        let mut others = self.inner.roster.non_focus();
        if others.len() != 1 {
            return None;
        }
        let peer = others.pop()?;
        if self.inner.config.p2p.disqualify_gateways && peer.is_gateway {
            debug!("sole peer {} is a gateway, staying on the bridge", peer.id);
            return None;
        }
        Some(peer)
    }

    async fn cancel_deferred(&self) {
        if let Some(handle) = self.inner.deferred_start.lock().await.take() {
            handle.abort();
            debug!("cancelled pending deferred direct-session start");
        }
    }

    async fn arm_deferred(&self) {
        let delay = self.inner.config.p2p.back_to_p2p_delay;
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear the slot first so the evaluation below cannot abort
            // the very task it is running on.
            controller.inner.deferred_start.lock().await.take();
            controller.evaluate(EvalCause::TimerFired).await;
        });
        let mut slot = self.inner.deferred_start.lock().await;
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
        debug!("direct-session start deferred by {delay:?}");
    }

    async fn start_p2p(&self, local: EndpointId, peer: EndpointId) {
        let mut slot = self.inner.p2p.write().await;
        if slot.is_some() {
            debug!("direct session already present, not starting another");
            return;
        }
        info!("starting direct session with {peer}");
        let params = SessionParams {
            sid: SessionId::generate(),
            local,
            peer: peer.clone(),
            role: SessionRole::Initiator,
            topology: SessionTopology::PeerToPeer,
            config: self.inner.config.p2p_session.clone(),
        };
        let presence: Arc<dyn PresenceDirectory> = self.roster();
        let built = JingleSession::new(
            params,
            self.inner.factory.as_ref(),
            Arc::clone(&self.inner.signaling),
            presence,
        )
        .await;
        let (session, events) = match built {
            Ok(pair) => pair,
            Err(error) => {
                warn!("could not build a direct session towards {peer}: {error}");
                return;
            }
        };
        *slot = Some(session.clone());
        drop(slot);

        self.spawn_session_pump(session.clone(), events);
        let tracks = self.inner.local_tracks.read().await.clone();
        if let Err(error) = session.invite(tracks).await {
            warn!("direct-session invite to {peer} failed: {error}");
            session
                .terminate(TerminateReason::GeneralError, Some("invite failed"), false)
                .await;
        }
    }

    /// Take and end the direct session. With a sid filter, only when the
    /// slot still holds that exact session.
    async fn take_p2p(&self, sid: Option<&SessionId>) -> Option<JingleSession> {
        let mut slot = self.inner.p2p.write().await;
        match (slot.as_ref(), sid) {
            (Some(session), Some(want)) if session.id() != want => None,
            _ => slot.take(),
        }
    }

    async fn stop_p2p(&self, reason: TerminateReason, message: &str) {
        if let Some(session) = self.take_p2p(None).await {
            session.terminate(reason, Some(message), true).await;
            self.deactivate_p2p();
        }
    }

    fn deactivate_p2p(&self) {
        if self.inner.p2p_active.swap(false, Ordering::SeqCst) {
            self.inner
                .events
                .publish(ConferenceEvent::MediaSessionActiveChanged { p2p_active: false });
        }
    }

    // ---- inbound calls ----

    /// Adopt an inbound session-initiate: build the responder session,
    /// slot it by topology, and answer it with the current local tracks.
    pub async fn handle_incoming_initiate(
        &self,
        from: EndpointId,
        topology: SessionTopology,
        payload: JinglePayload,
    ) {
        let Some(local) = self.local_id().await else {
            warn!("session-initiate from {from} before the room join completed, dropping");
            return;
        };
        let sid = payload.sid.clone();
        debug!("incoming {topology} session-initiate {sid} from {from}");

        if topology.is_p2p() && !self.should_accept_p2p(&local, &from) {
            self.decline(&from, &sid).await;
            return;
        }

        let params = SessionParams {
            sid: sid.clone(),
            local,
            peer: from.clone(),
            role: SessionRole::Responder,
            topology,
            config: match topology {
                SessionTopology::PeerToPeer => self.inner.config.p2p_session.clone(),
                SessionTopology::Bridged => self.inner.config.bridged_session.clone(),
            },
        };
        let presence: Arc<dyn PresenceDirectory> = self.roster();
        let built = JingleSession::new(
            params,
            self.inner.factory.as_ref(),
            Arc::clone(&self.inner.signaling),
            presence,
        )
        .await;
        let (session, events) = match built {
            Ok(pair) => pair,
            Err(error) => {
                warn!("could not build a session for inbound initiate {sid}: {error}");
                return;
            }
        };
        session.set_bridge_session_id(payload.bridge_session.clone()).await;

        let slot = match topology {
            SessionTopology::PeerToPeer => &self.inner.p2p,
            SessionTopology::Bridged => &self.inner.bridged,
        };
        if let Some(previous) = slot.write().await.replace(session.clone()) {
            debug!("session {} superseded by inbound initiate {sid}", previous.id());
            previous
                .terminate(TerminateReason::Gone, Some("superseded"), false)
                .await;
        }
        self.spawn_session_pump(session.clone(), events);
        self.inner.events.publish(ConferenceEvent::CallIncoming {
            sid: sid.clone(),
            from,
            topology,
        });

        let offer = SessionDescription::from_contents(&payload.contents);
        let tracks = self.inner.local_tracks.read().await.clone();
        if let Err(error) = session.accept_offer(offer, tracks).await {
            warn!("accepting inbound session {sid} failed: {error}");
        }
    }

    /// A direct initiate is honored only from the sole eligible peer, and
    /// only when the tie-break designates that peer as initiator.
    fn should_accept_p2p(&self, local: &EndpointId, from: &EndpointId) -> bool {
        let Some(peer) = self.eligible_peer() else {
            debug!("direct session from {from} while not eligible for p2p, declining");
            return false;
        };
        if peer.id != *from {
            warn!("direct session from {from} but the eligible peer is {}, declining", peer.id);
            return false;
        }
        match from.cmp(local) {
            CmpOrdering::Less => true,
            CmpOrdering::Equal => {
                warn!("direct session from an endpoint with our own id, declining");
                false
            }
            CmpOrdering::Greater => {
                warn!("{from} initiated but the tie-break designates this side, declining");
                false
            }
        }
    }

    /// Refuse an initiate for which no session was built.
    async fn decline(&self, from: &EndpointId, sid: &SessionId) {
        let payload = JinglePayload::new(JingleAction::SessionTerminate, sid.clone())
            .with_reason(Reason::new(TerminateReason::Decline).with_text("not acceptable here"));
        if let Err(failure) = self.inner.signaling.send_iq(from, &payload).await {
            warn!("could not decline session {sid} from {from}: {failure}");
        }
    }

    // ---- session event translation ----

    fn spawn_session_pump(
        &self,
        session: JingleSession,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.on_session_event(&session, event).await;
            }
        });
    }

    async fn on_session_event(&self, session: &JingleSession, event: SessionEvent) {
        let sid = session.id().clone();
        let publish = |event| self.inner.events.publish(event);
        match event {
            SessionEvent::IceConnectionStateChanged { state } => {
                if state == IceConnectionState::Failed && session.is_p2p() {
                    self.on_p2p_failure(session).await;
                }
            }
            SessionEvent::MediaSessionEstablished => {
                publish(ConferenceEvent::MediaSessionStarted { sid: sid.clone() });
                if session.is_p2p() && !self.inner.p2p_active.swap(true, Ordering::SeqCst) {
                    publish(ConferenceEvent::MediaSessionActiveChanged { p2p_active: true });
                    publish(ConferenceEvent::P2pEstablished {
                        sid,
                        peer: session.peer().clone(),
                    });
                }
            }
            SessionEvent::ConnectionEstablished => {
                publish(ConferenceEvent::ConnectionEstablished { sid });
            }
            SessionEvent::ConnectionInterrupted => {
                publish(ConferenceEvent::ConnectionInterrupted { sid });
            }
            SessionEvent::ConnectionRestored => {
                publish(ConferenceEvent::ConnectionRestored { sid });
            }
            SessionEvent::RenegotiationFailed { reason } => {
                publish(ConferenceEvent::RenegotiationFailed { sid, reason });
            }
            SessionEvent::AcceptTimeout => {
                publish(ConferenceEvent::AcceptTimeout { sid });
            }
            SessionEvent::RemoteTrackAdded { track } => {
                publish(ConferenceEvent::RemoteTrackAdded { track });
            }
            SessionEvent::RemoteTrackRemoved { owner, media } => {
                publish(ConferenceEvent::RemoteTrackRemoved { owner, media });
            }
            SessionEvent::Ended { reason } => {
                self.on_session_ended(session, reason).await;
            }
        }
    }

    /// Direct-path ICE failure: drop back to the relay, no automatic
    /// retry. The next membership change re-evaluates from scratch.
    async fn on_p2p_failure(&self, session: &JingleSession) {
        warn!(
            "direct session {} lost ICE, falling back to the bridge",
            session.id()
        );
        if let Some(failed) = self.take_p2p(Some(session.id())).await {
            self.inner.events.publish(ConferenceEvent::P2pFailed {
                sid: failed.id().clone(),
                peer: failed.peer().clone(),
            });
            failed
                .terminate(
                    TerminateReason::ConnectivityError,
                    Some("ice failed"),
                    true,
                )
                .await;
            self.deactivate_p2p();
        }
    }

    async fn on_session_ended(&self, session: &JingleSession, reason: TerminateReason) {
        let sid = session.id().clone();
        debug!("session {sid} ended: {reason}");
        if session.is_p2p() {
            if self.take_p2p(Some(&sid)).await.is_some() {
                self.deactivate_p2p();
            }
        } else {
            let mut slot = self.inner.bridged.write().await;
            if slot.as_ref().is_some_and(|current| current.id() == &sid) {
                slot.take();
            }
        }
        self.inner
            .events
            .publish(ConferenceEvent::SessionEnded { sid, reason });
    }
}
