//! Conference configuration.
//!
//! One [`ConferenceConfig`] is handed to the policy controller at
//! construction. The two embedded [`SessionConfig`]s let the bridged and
//! direct transports carry different ICE policies (a deployment commonly
//! disables TCP candidates on the direct path only).
//!
//! ## Example
//!
//! ```rust
//! use rmeet_conference_core::{ConferenceConfig, P2pConfig};
//! use rmeet_jingle_core::EndpointId;
//!
//! let config = ConferenceConfig::new(EndpointId::new("room@muc/focus"))
//!     .with_p2p(P2pConfig::default().with_enabled(false));
//! assert!(!config.p2p.enabled);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rmeet_jingle_core::EndpointId;
use rmeet_session_core::SessionConfig;

/// Default settle time before a leave-triggered switch to peer-to-peer.
pub const DEFAULT_BACK_TO_P2P_DELAY: Duration = Duration::from_secs(5);

/// Peer-to-peer switch policy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pConfig {
    /// Whether direct sessions are attempted at all.
    pub enabled: bool,

    /// How long a leave-triggered eligibility must hold before a direct
    /// session is started. Damps reload flapping.
    pub back_to_p2p_delay: Duration,

    /// Treat gateway participants as ineligible peers.
    pub disqualify_gateways: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            back_to_p2p_delay: DEFAULT_BACK_TO_P2P_DELAY,
            disqualify_gateways: true,
        }
    }
}

impl P2pConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_back_to_p2p_delay(mut self, delay: Duration) -> Self {
        self.back_to_p2p_delay = delay;
        self
    }

    pub fn with_disqualify_gateways(mut self, disqualify: bool) -> Self {
        self.disqualify_gateways = disqualify;
        self
    }
}

/// Settings for one conference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceConfig {
    /// Identity of the conference focus. Sessions initiated by this
    /// endpoint run over the relay.
    pub focus: EndpointId,

    /// Peer-to-peer switch policy.
    pub p2p: P2pConfig,

    /// Negotiation settings for the bridged session.
    pub bridged_session: SessionConfig,

    /// Negotiation settings for the direct session.
    pub p2p_session: SessionConfig,
}

impl ConferenceConfig {
    pub fn new(focus: EndpointId) -> Self {
        Self {
            focus,
            p2p: P2pConfig::default(),
            bridged_session: SessionConfig::default(),
            p2p_session: SessionConfig::default(),
        }
    }

    pub fn with_p2p(mut self, p2p: P2pConfig) -> Self {
        self.p2p = p2p;
        self
    }

    pub fn with_bridged_session(mut self, config: SessionConfig) -> Self {
        self.bridged_session = config;
        self
    }

    pub fn with_p2p_session(mut self, config: SessionConfig) -> Self {
        self.p2p_session = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_p2p_with_settle_delay() {
        let config = ConferenceConfig::new(EndpointId::new("room@muc/focus"));
        assert!(config.p2p.enabled);
        assert!(config.p2p.disqualify_gateways);
        assert_eq!(config.p2p.back_to_p2p_delay, DEFAULT_BACK_TO_P2P_DELAY);
    }
}
