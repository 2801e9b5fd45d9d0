//! Session configuration.
//!
//! One [`SessionConfig`] is handed to each session at construction.
//! A conference typically carries two of these with different ICE transport
//! policies, one for the bridged session and one for the direct session.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use rmeet_session_core::SessionConfig;
//!
//! let config = SessionConfig::default()
//!     .with_ice_restart(true)
//!     .with_candidate_batch_window(Duration::from_millis(100));
//! assert!(config.enable_ice_restart);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default accumulation window for outbound ICE candidates.
pub const DEFAULT_CANDIDATE_BATCH_WINDOW: Duration = Duration::from_millis(150);

/// Default response window for awaited IQ exchanges.
pub const DEFAULT_IQ_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Do not offer simulcast layers for local video.
    pub disable_simulcast: bool,

    /// Exclude UDP candidates from inbound candidate application.
    pub ice_udp_disabled: bool,

    /// Exclude TCP candidates from inbound candidate application.
    pub ice_tcp_disabled: bool,

    /// Test flag: ask the engine to sabotage ICE so failure paths can be
    /// exercised end to end.
    pub fail_ice: bool,

    /// Accept inbound transport-replace and restart ICE. When disabled, a
    /// transport-replace is answered by terminating the session with a
    /// failed-transport reason.
    pub enable_ice_restart: bool,

    /// How long outbound candidates accumulate before being flushed as one
    /// transport-info message.
    pub candidate_batch_window: Duration,

    /// Response window for awaited IQ exchanges.
    pub iq_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disable_simulcast: false,
            ice_udp_disabled: false,
            ice_tcp_disabled: false,
            fail_ice: false,
            enable_ice_restart: false,
            candidate_batch_window: DEFAULT_CANDIDATE_BATCH_WINDOW,
            iq_timeout: DEFAULT_IQ_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn with_simulcast_disabled(mut self, disabled: bool) -> Self {
        self.disable_simulcast = disabled;
        self
    }

    pub fn with_ice_udp_disabled(mut self, disabled: bool) -> Self {
        self.ice_udp_disabled = disabled;
        self
    }

    pub fn with_ice_tcp_disabled(mut self, disabled: bool) -> Self {
        self.ice_tcp_disabled = disabled;
        self
    }

    pub fn with_fail_ice(mut self, fail: bool) -> Self {
        self.fail_ice = fail;
        self
    }

    pub fn with_ice_restart(mut self, enabled: bool) -> Self {
        self.enable_ice_restart = enabled;
        self
    }

    pub fn with_candidate_batch_window(mut self, window: Duration) -> Self {
        self.candidate_batch_window = window;
        self
    }

    pub fn with_iq_timeout(mut self, timeout: Duration) -> Self {
        self.iq_timeout = timeout;
        self
    }

    /// Allowed inbound candidate protocols as `(udp, tcp)`.
    pub fn candidate_protocols(&self) -> (bool, bool) {
        (!self.ice_udp_disabled, !self.ice_tcp_disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.candidate_batch_window, Duration::from_millis(150));
        assert_eq!(config.iq_timeout, Duration::from_secs(10));
        assert!(!config.enable_ice_restart);
        assert!(!config.ice_udp_disabled);
    }

    #[test]
    fn builders_override_defaults() {
        let config = SessionConfig::default()
            .with_ice_tcp_disabled(true)
            .with_iq_timeout(Duration::from_secs(3));
        assert!(config.ice_tcp_disabled);
        assert_eq!(config.iq_timeout, Duration::from_secs(3));
    }
}
