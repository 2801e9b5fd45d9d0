//! Conference-level event fan-out over `tokio::sync::broadcast`.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use rmeet_jingle_core::{EndpointId, MediaKind, SessionId, TerminateReason};
use rmeet_session_core::{RemoteTrack, SessionTopology};

use crate::error::{ConferenceError, Result};
use crate::roster::Participant;

/// Events published by the policy controller for the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConferenceEvent {
    /// A remote occupant entered the room.
    MemberJoined { participant: Participant },

    /// A remote occupant left the room.
    MemberLeft { id: EndpointId },

    /// An inbound session-initiate was accepted; a responder session now
    /// exists and its answer is on the way.
    CallIncoming {
        sid: SessionId,
        from: EndpointId,
        topology: SessionTopology,
    },

    /// A session's media path became usable for the first time.
    MediaSessionStarted { sid: SessionId },

    /// Outbound media moved between the relay and the direct path.
    MediaSessionActiveChanged { p2p_active: bool },

    /// ICE connectivity reached for the first time on a session.
    ConnectionEstablished { sid: SessionId },

    /// ICE connectivity lost after having been established.
    ConnectionInterrupted { sid: SessionId },

    /// ICE connectivity recovered after an interruption.
    ConnectionRestored { sid: SessionId },

    /// A renegotiation attempt was rejected or failed.
    RenegotiationFailed { sid: SessionId, reason: String },

    /// The session-accept exchange timed out; the caller decides whether
    /// to restart the session.
    AcceptTimeout { sid: SessionId },

    /// The direct session carries media; outbound switched to it.
    P2pEstablished { sid: SessionId, peer: EndpointId },

    /// The direct session failed; outbound fell back to the relay.
    P2pFailed { sid: SessionId, peer: EndpointId },

    /// A remote track with a resolved owner became available.
    RemoteTrackAdded { track: RemoteTrack },

    /// A remote track disappeared from a negotiated description.
    RemoteTrackRemoved { owner: EndpointId, media: MediaKind },

    /// A session reached its terminal state.
    SessionEnded {
        sid: SessionId,
        reason: TerminateReason,
    },
}

/// Subscriber half of the conference event channel.
pub struct ConferenceEventStream {
    receiver: broadcast::Receiver<ConferenceEvent>,
}

impl ConferenceEventStream {
    /// Wait for the next event. A slow subscriber skips over events it
    /// missed rather than failing.
    pub async fn receive(&mut self) -> Result<ConferenceEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("conference event subscriber lagged, skipped {missed} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ConferenceError::EventsClosed)
                }
            }
        }
    }

    /// Drain one event without waiting.
    pub fn try_receive(&mut self) -> Option<ConferenceEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("conference event subscriber lagged, skipped {missed} event(s)");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Publisher of [`ConferenceEvent`]s.
///
/// Publishing with no live subscriber is fine; events are then dropped.
#[derive(Debug, Clone)]
pub struct ConferenceEvents {
    sender: broadcast::Sender<ConferenceEvent>,
}

impl ConferenceEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> ConferenceEventStream {
        ConferenceEventStream {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn publish(&self, event: ConferenceEvent) {
        debug!("conference event: {event:?}");
        if self.sender.send(event).is_err() {
            debug!("no conference event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let events = ConferenceEvents::new();
        let mut first = events.subscribe();
        let mut second = events.subscribe();

        events.publish(ConferenceEvent::MediaSessionActiveChanged { p2p_active: true });

        let expected = ConferenceEvent::MediaSessionActiveChanged { p2p_active: true };
        assert_eq!(first.receive().await, Ok(expected.clone()));
        assert_eq!(second.receive().await, Ok(expected));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let events = ConferenceEvents::new();
        events.publish(ConferenceEvent::MemberLeft {
            id: EndpointId::new("room@muc/bob"),
        });

        let mut late = events.subscribe();
        assert_eq!(late.try_receive(), None);
    }
}
