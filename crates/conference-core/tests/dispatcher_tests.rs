//! Inbound routing: ack-first discipline, topology selection, sid routing,
//! and the p2p accept/decline decision.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use rmeet_conference_core::{
    ConferenceConfig, ConferenceEvent, P2pConfig, Participant, ProtocolDispatcher, RoomEvent,
    SessionPolicyController,
};
use rmeet_jingle_core::{
    CandidateKind, Content, ContentName, Creator, EndpointId, IceCandidate, IceTransport,
    IqRequest, JingleAction, JinglePayload, MediaDescription, MediaKind, Reason, Senders,
    SessionId, SourceEntry, TerminateReason,
};
use rmeet_session_core::testing::{FakeEngineFactory, FakeSignalingTransport};
use rmeet_session_core::{SessionRole, SessionState, SessionTopology};

fn focus_id() -> EndpointId {
    EndpointId::new("room@muc/focus")
}

fn local_id() -> EndpointId {
    EndpointId::new("room@muc/me")
}

fn build_stack(
    config: ConferenceConfig,
) -> (
    SessionPolicyController,
    ProtocolDispatcher,
    Arc<FakeSignalingTransport>,
    Arc<FakeEngineFactory>,
) {
    let factory = Arc::new(FakeEngineFactory::new());
    let signaling = Arc::new(FakeSignalingTransport::new());
    let controller = SessionPolicyController::new(config, factory.clone(), signaling.clone());
    let dispatcher = ProtocolDispatcher::new(controller.clone(), signaling.clone());
    (controller, dispatcher, signaling, factory)
}

async fn joined_stack() -> (
    SessionPolicyController,
    ProtocolDispatcher,
    Arc<FakeSignalingTransport>,
    Arc<FakeEngineFactory>,
) {
    let stack = build_stack(ConferenceConfig::new(focus_id()));
    stack
        .0
        .handle_room_event(RoomEvent::RoomJoined {
            local_id: local_id(),
        })
        .await;
    stack
}

fn media_contents() -> Vec<Content> {
    vec![
        Content::new(Creator::Initiator, ContentName::audio())
            .with_description(MediaDescription::new(MediaKind::Audio)),
        Content::new(Creator::Initiator, ContentName::video())
            .with_description(MediaDescription::new(MediaKind::Video)),
    ]
}

fn initiate_payload(from: &EndpointId, sid: &str) -> JinglePayload {
    let mut payload = JinglePayload::new(JingleAction::SessionInitiate, SessionId::new(sid))
        .with_initiator(from.clone());
    for content in media_contents() {
        payload = payload.add_content(content);
    }
    payload
}

fn initiate(from: &EndpointId, sid: &str) -> IqRequest {
    IqRequest::new(from.clone(), local_id(), initiate_payload(from, sid))
}

#[test_log::test(tokio::test)]
async fn initiate_from_the_focus_builds_a_bridged_responder() {
    let (controller, dispatcher, signaling, _factory) = joined_stack().await;
    let mut events = controller.subscribe();

    let request = IqRequest::new(
        focus_id(),
        local_id(),
        initiate_payload(&focus_id(), "jvb1").with_bridge_session("relay-7"),
    );
    let stanza = request.id.clone();
    dispatcher.dispatch(request).await;

    assert_eq!(signaling.acknowledged().await, vec![stanza]);

    let session = controller.bridged_session().await.expect("session adopted");
    assert_eq!(session.role(), SessionRole::Responder);
    assert!(!session.is_p2p());
    assert_eq!(session.state().await, SessionState::Active);
    assert_eq!(session.bridge_session_id().await, Some("relay-7".to_string()));

    let accept = signaling
        .wait_for_sent(JingleAction::SessionAccept, Duration::from_millis(500))
        .await
        .expect("answer echoed");
    assert_eq!(accept.sid, SessionId::new("jvb1"));
    assert_eq!(accept.responder, Some(local_id()));

    let mut incoming = false;
    while let Some(event) = events.try_receive() {
        if let ConferenceEvent::CallIncoming { sid, from, topology } = event {
            assert_eq!(sid, SessionId::new("jvb1"));
            assert_eq!(from, focus_id());
            assert_eq!(topology, SessionTopology::Bridged);
            incoming = true;
        }
    }
    assert!(incoming);
}

#[test_log::test(tokio::test)]
async fn every_request_is_acknowledged_even_unroutable_ones() {
    let (_controller, dispatcher, signaling, _factory) = joined_stack().await;

    let payload = JinglePayload::new(JingleAction::TransportInfo, SessionId::new("nope"));
    let request = IqRequest::new(focus_id(), local_id(), payload);
    let stanza = request.id.clone();
    dispatcher.dispatch(request).await;

    assert_eq!(signaling.acknowledged().await, vec![stanza]);
    assert!(signaling.sent().await.is_empty(), "unknown sids are dropped, not answered");
}

#[test_log::test(tokio::test)]
async fn transport_info_routes_candidates_to_the_owning_session() {
    let (_controller, dispatcher, _signaling, factory) = joined_stack().await;
    dispatcher.dispatch(initiate(&focus_id(), "jvb1")).await;

    let candidate = IceCandidate {
        id: "c1".to_string(),
        foundation: "1".to_string(),
        component: 1,
        protocol: "udp".to_string(),
        priority: 2_130_706_431,
        address: "192.0.2.7".parse().expect("addr"),
        port: 9000,
        kind: CandidateKind::Host,
        related_address: None,
        related_port: None,
        generation: 0,
    };
    let payload = JinglePayload::new(JingleAction::TransportInfo, SessionId::new("jvb1"))
        .add_content(
            Content::new(Creator::Initiator, ContentName::audio())
                .with_transport(IceTransport::new().add_candidate(candidate)),
        );
    dispatcher
        .dispatch(IqRequest::new(focus_id(), local_id(), payload))
        .await;

    let engine = factory.latest().expect("engine built");
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while engine.applied_candidates().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "candidate never applied");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(engine.applied_candidates()[0].1.id, "c1");
}

#[test_log::test(tokio::test)]
async fn p2p_initiate_is_accepted_only_from_the_designated_initiator() {
    // Peer id sorts below ours: the peer initiates, this side answers.
    let (controller, dispatcher, signaling, _factory) =
        build_stack(ConferenceConfig::new(focus_id()));
    controller
        .handle_room_event(RoomEvent::RoomJoined {
            local_id: EndpointId::new("room@muc/20"),
        })
        .await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/10")))
        .await;

    let peer = EndpointId::new("room@muc/10");
    let mut request = initiate(&peer, "direct1");
    request.to = EndpointId::new("room@muc/20");
    dispatcher.dispatch(request).await;

    let session = controller.p2p_session().await.expect("direct call accepted");
    assert_eq!(session.role(), SessionRole::Responder);
    assert!(signaling
        .wait_for_sent(JingleAction::SessionAccept, Duration::from_millis(500))
        .await
        .is_some());

    // Reversed ordering: the sender is not the designated initiator.
    let (controller, dispatcher, signaling, _factory) =
        build_stack(ConferenceConfig::new(focus_id()));
    controller
        .handle_room_event(RoomEvent::RoomJoined {
            local_id: EndpointId::new("room@muc/10"),
        })
        .await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;
    // This side already initiated; drop that to isolate the decline.
    let own_initiate = signaling
        .wait_for_sent(JingleAction::SessionInitiate, Duration::from_millis(500))
        .await;
    assert!(own_initiate.is_some());

    let peer = EndpointId::new("room@muc/20");
    let mut request = initiate(&peer, "direct2");
    request.to = EndpointId::new("room@muc/10");
    dispatcher.dispatch(request).await;

    let decline = signaling
        .wait_for_sent(JingleAction::SessionTerminate, Duration::from_millis(500))
        .await
        .expect("misdirected initiate declined");
    assert_eq!(decline.sid, SessionId::new("direct2"));
    assert_eq!(
        decline.reason.as_ref().map(|r| r.condition),
        Some(TerminateReason::Decline)
    );
    // The existing outbound attempt is untouched.
    let session = controller.p2p_session().await.expect("own session kept");
    assert_eq!(session.role(), SessionRole::Initiator);
}

#[test_log::test(tokio::test)]
async fn remote_terminate_ends_the_session_without_an_echo() {
    let (controller, dispatcher, signaling, _factory) = joined_stack().await;
    dispatcher.dispatch(initiate(&focus_id(), "jvb1")).await;
    let session = controller.bridged_session().await.expect("session adopted");

    let payload = JinglePayload::new(JingleAction::SessionTerminate, SessionId::new("jvb1"))
        .with_reason(Reason::new(TerminateReason::Gone));
    dispatcher
        .dispatch(IqRequest::new(focus_id(), local_id(), payload))
        .await;

    assert_eq!(session.state().await, SessionState::Ended);
    assert!(
        signaling.sent_with_action(JingleAction::SessionTerminate).await.is_empty(),
        "a remote terminate is never echoed"
    );

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while controller.bridged_session().await.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "ended session never unslotted");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test_log::test(tokio::test)]
async fn source_add_surfaces_a_new_remote_track() {
    let (controller, dispatcher, _signaling, _factory) = joined_stack().await;
    let mut events = controller.subscribe();
    dispatcher.dispatch(initiate(&focus_id(), "jvb1")).await;
    let session = controller.bridged_session().await.expect("session adopted");

    let bob = EndpointId::new("room@muc/bob");
    let payload = JinglePayload::new(JingleAction::SourceAdd, SessionId::new("jvb1")).add_content(
        Content::new(Creator::Initiator, ContentName::audio()).with_description(
            MediaDescription::new(MediaKind::Audio)
                .add_source(SourceEntry::new("5005").with_owner(bob.clone())),
        ),
    );
    dispatcher
        .dispatch(IqRequest::new(focus_id(), local_id(), payload))
        .await;

    assert!(session.remote_track(&bob, MediaKind::Audio).is_some());
    assert_eq!(session.source_owner(5005), Some(bob.clone()));

    let track = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match events.receive().await {
                Ok(ConferenceEvent::RemoteTrackAdded { track }) => break track,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("track surfaced");
    assert_eq!(track.owner, bob);
}

#[test_log::test(tokio::test)]
async fn content_modify_updates_remote_video_state() {
    let (controller, dispatcher, _signaling, _factory) = joined_stack().await;
    dispatcher.dispatch(initiate(&focus_id(), "jvb1")).await;
    let session = controller.bridged_session().await.expect("session adopted");
    assert!(session.remote_video_active());

    let payload = JinglePayload::new(JingleAction::ContentModify, SessionId::new("jvb1"))
        .add_content(
            Content::new(Creator::Initiator, ContentName::video()).with_senders(Senders::None),
        );
    dispatcher
        .dispatch(IqRequest::new(focus_id(), local_id(), payload))
        .await;

    assert!(!session.remote_video_active());
}
