//! Outbound signaling surface.
//!
//! The XMPP stream itself (framing, reconnection, stream management) is
//! external; sessions only need to send Jingle IQs and acknowledge inbound
//! ones. Implementations are expected to enforce the configured response
//! window internally and surface it as [`IqFailure::Timeout`].

use async_trait::async_trait;

use rmeet_jingle_core::{EndpointId, IqFailure, JinglePayload, StanzaId};

/// Sends Jingle IQs over the signaling connection.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send an IQ and wait for its result.
    ///
    /// Resolves once the peer replies with a result stanza; fails with
    /// [`IqFailure::Error`] on an error stanza, [`IqFailure::Timeout`] after
    /// the response window, and [`IqFailure::Disconnected`] when the stream
    /// is gone.
    async fn send_iq(&self, to: &EndpointId, payload: &JinglePayload) -> Result<(), IqFailure>;

    /// Acknowledge receipt of an inbound IQ.
    ///
    /// The protocol requires the acknowledgment regardless of whether the
    /// payload is subsequently processed, dropped, or fails.
    async fn acknowledge(&self, stanza: &StanzaId);
}
