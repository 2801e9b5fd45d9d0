//! Conference orchestration for the RMEET signaling stack.
//!
//! This crate sits above the per-session negotiation machinery and decides
//! which sessions exist at all: it tracks room membership, runs the
//! peer-to-peer switch policy (start a direct session when exactly one
//! other participant is present, fall back to the relay when it is not or
//! when the direct path fails), adopts inbound calls, and routes inbound
//! Jingle traffic to the owning session. Everything the application needs
//! to observe is published as [`ConferenceEvent`]s.

// Error taxonomy
pub mod error;

// Conference settings
pub mod config;

// Room membership
pub mod roster;

// Conference event fan-out
pub mod events;

// P2P switch policy and transport arbitration
pub mod policy;

// Inbound Jingle routing
pub mod dispatcher;

// Public exports
pub use config::{ConferenceConfig, P2pConfig, DEFAULT_BACK_TO_P2P_DELAY};
pub use dispatcher::ProtocolDispatcher;
pub use error::{ConferenceError, Result};
pub use events::{ConferenceEvent, ConferenceEventStream, ConferenceEvents};
pub use policy::SessionPolicyController;
pub use roster::{Participant, RoomEvent, Roster};

/// Re-export of common types and traits
pub mod prelude {
    pub use super::{
        ConferenceConfig, ConferenceError, ConferenceEvent, ConferenceEventStream, P2pConfig,
        Participant, ProtocolDispatcher, RoomEvent, Roster, SessionPolicyController,
    };
    pub use rmeet_session_core::prelude::*;
}
