//! Room membership as seen by the signaling core.
//!
//! The roster tracks remote occupants only; the local endpoint never
//! appears in it. Room bookkeeping itself (XMPP MUC join, presence
//! parsing) is external and feeds the controller through [`RoomEvent`]s.

use dashmap::DashMap;

use rmeet_jingle_core::{EndpointId, MediaKind};
use rmeet_session_core::{PeerMediaInfo, PresenceDirectory};

/// One remote occupant of the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: EndpointId,

    /// The conference focus, excluded from the peer count.
    pub is_focus: bool,

    /// Gateway or bot participants are disqualified from direct sessions.
    pub is_gateway: bool,

    /// Presence-advertised audio state.
    pub audio: PeerMediaInfo,

    /// Presence-advertised video state.
    pub video: PeerMediaInfo,
}

impl Participant {
    pub fn new(id: impl Into<EndpointId>) -> Self {
        Self {
            id: id.into(),
            is_focus: false,
            is_gateway: false,
            audio: PeerMediaInfo::default(),
            video: PeerMediaInfo::default(),
        }
    }

    /// The conference focus occupant.
    pub fn focus(id: impl Into<EndpointId>) -> Self {
        let mut participant = Self::new(id);
        participant.is_focus = true;
        participant
    }

    pub fn with_gateway(mut self, is_gateway: bool) -> Self {
        self.is_gateway = is_gateway;
        self
    }

    pub fn with_audio(mut self, audio: PeerMediaInfo) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_video(mut self, video: PeerMediaInfo) -> Self {
        self.video = video;
        self
    }
}

/// Membership changes delivered by the room layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The local join completed; policy evaluation starts from here.
    RoomJoined { local_id: EndpointId },

    /// A remote occupant entered.
    MemberJoined(Participant),

    /// A remote occupant left.
    MemberLeft(EndpointId),

    /// A remote occupant's presence payload changed.
    MemberUpdated(Participant),
}

/// Concurrent view of the current remote membership.
#[derive(Debug, Default)]
pub struct Roster {
    members: DashMap<EndpointId, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a member. Returns true when the member is new.
    pub fn upsert(&self, participant: Participant) -> bool {
        self.members
            .insert(participant.id.clone(), participant)
            .is_none()
    }

    pub fn remove(&self, id: &EndpointId) -> Option<Participant> {
        self.members.remove(id).map(|(_, participant)| participant)
    }

    pub fn get(&self, id: &EndpointId) -> Option<Participant> {
        self.members.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.members.iter().map(|entry| entry.clone()).collect()
    }

    /// Everyone except the focus, the population the switch policy counts.
    pub fn non_focus(&self) -> Vec<Participant> {
        self.members
            .iter()
            .filter(|entry| !entry.is_focus)
            .map(|entry| entry.clone())
            .collect()
    }
}

impl PresenceDirectory for Roster {
    fn peer_media_info(&self, id: &EndpointId, media: MediaKind) -> Option<PeerMediaInfo> {
        self.members.get(id).map(|participant| match media {
            MediaKind::Audio => participant.audio.clone(),
            MediaKind::Video => participant.video.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn membership_round_trip() {
        let roster = Roster::new();
        let alice = Participant::new("room@muc/alice");

        assert!(roster.upsert(alice.clone()));
        assert!(!roster.upsert(alice.clone()), "second upsert refreshes");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get(&alice.id), Some(alice.clone()));

        assert_eq!(roster.remove(&alice.id), Some(alice.clone()));
        assert!(roster.is_empty());
        assert_eq!(roster.remove(&alice.id), None);
    }

    #[test]
    fn focus_is_excluded_from_the_peer_population() {
        let roster = Roster::new();
        roster.upsert(Participant::focus("room@muc/focus"));
        roster.upsert(Participant::new("room@muc/bob"));

        let peers = roster.non_focus();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, EndpointId::new("room@muc/bob"));
    }

    #[test]
    fn presence_lookup_is_per_media_kind() {
        let roster = Roster::new();
        let muted_audio = PeerMediaInfo {
            muted: true,
            video_type: None,
        };
        roster.upsert(Participant::new("room@muc/carol").with_audio(muted_audio.clone()));

        let carol = EndpointId::new("room@muc/carol");
        assert_eq!(roster.peer_media_info(&carol, MediaKind::Audio), Some(muted_audio));
        assert_eq!(
            roster.peer_media_info(&carol, MediaKind::Video),
            Some(PeerMediaInfo::default())
        );
        assert_eq!(roster.peer_media_info(&EndpointId::new("room@muc/nobody"), MediaKind::Audio), None);
    }
}
