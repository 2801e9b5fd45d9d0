//! Inbound Jingle routing.
//!
//! Stateless translator from inbound IQs to session and controller calls.
//! Receipt is acknowledged before anything else; the protocol requires the
//! ack whether or not the payload turns out to be processable. Unknown
//! session ids and malformed payloads are logged and dropped, never
//! propagated as failures back to the remote side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use rmeet_jingle_core::{
    EndpointId, IqRequest, JingleAction, JinglePayload, SessionDescription, TerminateReason,
};
use rmeet_session_core::{JingleSession, SessionTopology, SignalingTransport};

use crate::policy::SessionPolicyController;

pub struct ProtocolDispatcher {
    controller: SessionPolicyController,
    signaling: Arc<dyn SignalingTransport>,
}

impl ProtocolDispatcher {
    pub fn new(
        controller: SessionPolicyController,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Self {
        Self {
            controller,
            signaling,
        }
    }

    /// Consume inbound IQs until the channel closes.
    pub async fn run(self, mut requests: mpsc::UnboundedReceiver<IqRequest>) {
        while let Some(request) = requests.recv().await {
            self.dispatch(request).await;
        }
        debug!("inbound stanza stream ended");
    }

    pub async fn dispatch(&self, request: IqRequest) {
        // Ack first, unconditionally.
        self.signaling.acknowledge(&request.id).await;

        let IqRequest { from, payload, .. } = request;
        match payload.action {
            JingleAction::SessionInitiate => self.on_initiate(from, payload).await,
            JingleAction::SessionAccept => self.on_accept(&from, payload).await,
            JingleAction::SessionTerminate => self.on_terminate(&from, payload).await,
            JingleAction::TransportInfo => {
                let Some(session) = self.route(&from, &payload, "transport-info").await else {
                    return;
                };
                session.add_ice_candidates(&payload.contents).await;
            }
            JingleAction::ContentModify => {
                let Some(session) = self.route(&from, &payload, "content-modify").await else {
                    return;
                };
                for content in &payload.contents {
                    session.handle_content_modify(content).await;
                }
            }
            JingleAction::SourceAdd => {
                let Some(session) = self.route(&from, &payload, "source-add").await else {
                    return;
                };
                if let Err(error) = session.add_remote_sources(payload.contents).await {
                    warn!("source-add from {from} not applied: {error}");
                }
            }
            JingleAction::SourceRemove => {
                let Some(session) = self.route(&from, &payload, "source-remove").await else {
                    return;
                };
                if let Err(error) = session.remove_remote_sources(payload.contents).await {
                    warn!("source-remove from {from} not applied: {error}");
                }
            }
            JingleAction::TransportReplace => self.on_transport_replace(&from, payload).await,
        }
    }

    async fn route(
        &self,
        from: &EndpointId,
        payload: &JinglePayload,
        what: &str,
    ) -> Option<JingleSession> {
        let found = self.controller.session(&payload.sid).await;
        if found.is_none() {
            warn!("{what} from {from} for unknown session {}, dropping", payload.sid);
        }
        found
    }

    async fn on_initiate(&self, from: EndpointId, payload: JinglePayload) {
        let topology = if from == *self.controller.focus() {
            SessionTopology::Bridged
        } else {
            SessionTopology::PeerToPeer
        };
        self.controller
            .handle_incoming_initiate(from, topology, payload)
            .await;
    }

    async fn on_accept(&self, from: &EndpointId, payload: JinglePayload) {
        let Some(session) = self.route(from, &payload, "session-accept").await else {
            return;
        };
        let answer = SessionDescription::from_contents(&payload.contents);
        if let Err(error) = session.set_answer(answer).await {
            warn!("session-accept for {} not applied: {error}", payload.sid);
        }
    }

    async fn on_transport_replace(&self, from: &EndpointId, payload: JinglePayload) {
        let Some(session) = self.route(from, &payload, "transport-replace").await else {
            return;
        };
        let Some(transport) = payload
            .contents
            .iter()
            .find_map(|content| content.transport.clone())
        else {
            warn!(
                "transport-replace for {} carries no transport block, dropping",
                payload.sid
            );
            return;
        };
        if let Err(error) = session.replace_transport(transport).await {
            warn!("transport-replace for {} failed: {error}", payload.sid);
        }
    }

    /// The remote side already considers the session over; never echo a
    /// terminate back.
    async fn on_terminate(&self, from: &EndpointId, payload: JinglePayload) {
        let Some(session) = self.route(from, &payload, "session-terminate").await else {
            return;
        };
        let reason = payload
            .reason
            .as_ref()
            .map(|reason| reason.condition)
            .unwrap_or(TerminateReason::Gone);
        session.terminate(reason, None, false).await;
    }
}
