//! P2P switch policy: tie-break, idempotency, debounce, teardown, and
//! fallback behavior.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use rmeet_conference_core::{
    ConferenceConfig, ConferenceEvent, P2pConfig, Participant, RoomEvent, SessionPolicyController,
};
use rmeet_jingle_core::{
    ContentName, EndpointId, JingleAction, MediaKind, MediaSection, SessionDescription,
    TerminateReason,
};
use rmeet_session_core::testing::{FakeEngineFactory, FakeSignalingTransport};
use rmeet_session_core::{IceConnectionState, SessionRole};

fn focus_id() -> EndpointId {
    EndpointId::new("room@muc/focus")
}

fn short_debounce() -> ConferenceConfig {
    ConferenceConfig::new(focus_id())
        .with_p2p(P2pConfig::default().with_back_to_p2p_delay(Duration::from_millis(50)))
}

fn build_controller(
    config: ConferenceConfig,
) -> (
    SessionPolicyController,
    Arc<FakeSignalingTransport>,
    Arc<FakeEngineFactory>,
) {
    let factory = Arc::new(FakeEngineFactory::new());
    let signaling = Arc::new(FakeSignalingTransport::new());
    let controller = SessionPolicyController::new(config, factory.clone(), signaling.clone());
    (controller, signaling, factory)
}

async fn join_as(controller: &SessionPolicyController, local: &str) {
    controller
        .handle_room_event(RoomEvent::RoomJoined {
            local_id: EndpointId::new(local),
        })
        .await;
}

fn remote_answer() -> SessionDescription {
    SessionDescription::new()
        .add_section(MediaSection::new(ContentName::audio(), MediaKind::Audio))
        .add_section(MediaSection::new(ContentName::video(), MediaKind::Video))
}

#[test_log::test(tokio::test)]
async fn smaller_endpoint_id_initiates_p2p() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;

    let initiate = signaling
        .wait_for_sent(JingleAction::SessionInitiate, Duration::from_millis(500))
        .await
        .expect("local side initiates");
    assert_eq!(initiate.initiator, Some(EndpointId::new("room@muc/10")));

    let session = controller.p2p_session().await.expect("direct session exists");
    assert_eq!(session.role(), SessionRole::Initiator);
    assert!(session.is_p2p());
}

#[test_log::test(tokio::test)]
async fn larger_endpoint_id_waits_for_the_peer() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/20").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/10")))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(signaling.sent_with_action(JingleAction::SessionInitiate).await.is_empty());
    assert!(controller.p2p_session().await.is_none());
}

#[test_log::test(tokio::test)]
async fn equal_endpoint_ids_start_nothing() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/same").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/same")))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(signaling.sent_with_action(JingleAction::SessionInitiate).await.is_empty());
    assert!(controller.p2p_session().await.is_none());
}

#[test_log::test(tokio::test)]
async fn reevaluation_with_unchanged_membership_is_a_no_op() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;
    let original = controller.p2p_session().await.expect("direct session exists");

    controller
        .handle_room_event(RoomEvent::MemberUpdated(Participant::new("room@muc/20")))
        .await;
    controller
        .handle_room_event(RoomEvent::MemberUpdated(Participant::new("room@muc/20")))
        .await;

    assert_eq!(
        signaling.sent_with_action(JingleAction::SessionInitiate).await.len(),
        1,
        "no second session may be started"
    );
    let kept = controller.p2p_session().await.expect("session survives");
    assert_eq!(kept.id(), original.id());
}

#[test_log::test(tokio::test)]
async fn third_participant_tears_p2p_down_immediately() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;
    assert!(controller.p2p_session().await.is_some());

    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/30")))
        .await;

    assert!(controller.p2p_session().await.is_none());
    let terminate = signaling
        .wait_for_sent(JingleAction::SessionTerminate, Duration::from_millis(500))
        .await
        .expect("teardown announced");
    assert_eq!(
        terminate.reason.as_ref().map(|r| r.condition),
        Some(TerminateReason::Success)
    );
}

#[test_log::test(tokio::test)]
async fn gateway_peers_are_not_eligible() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(
            Participant::new("room@muc/20").with_gateway(true),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(signaling.sent_with_action(JingleAction::SessionInitiate).await.is_empty());

    // The disqualification is policy, not hard-coded.
    let permissive = ConferenceConfig::new(focus_id()).with_p2p(
        P2pConfig::default()
            .with_back_to_p2p_delay(Duration::from_millis(50))
            .with_disqualify_gateways(false),
    );
    let (controller, signaling, _factory) = build_controller(permissive);
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(
            Participant::new("room@muc/20").with_gateway(true),
        ))
        .await;
    assert!(signaling
        .wait_for_sent(JingleAction::SessionInitiate, Duration::from_millis(500))
        .await
        .is_some());
}

#[test_log::test(tokio::test)]
async fn leave_triggered_start_waits_and_a_join_cancels_it() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;
    // Third occupant present from the start: no direct session yet.
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/30")))
        .await;
    assert!(controller.p2p_session().await.is_none());

    // Leaving arms the settle timer; rejoining within it cancels.
    controller
        .handle_room_event(RoomEvent::MemberLeft(EndpointId::new("room@muc/30")))
        .await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/30")))
        .await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(
        signaling.sent_with_action(JingleAction::SessionInitiate).await.is_empty(),
        "a cancelled settle timer must not start a session"
    );

    // Leaving again with nothing to cancel it starts the session.
    controller
        .handle_room_event(RoomEvent::MemberLeft(EndpointId::new("room@muc/30")))
        .await;
    assert!(controller.p2p_session().await.is_none(), "start is deferred, not immediate");
    assert!(signaling
        .wait_for_sent(JingleAction::SessionInitiate, Duration::from_millis(500))
        .await
        .is_some());
    assert!(controller.p2p_session().await.is_some());
}

#[test_log::test(tokio::test)]
async fn p2p_ice_failure_falls_back_to_the_bridge() {
    let (controller, signaling, factory) = build_controller(short_debounce());
    let mut events = controller.subscribe();
    join_as(&controller, "room@muc/10").await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/20")))
        .await;
    assert!(controller.p2p_session().await.is_some());

    let engine = factory.latest().expect("p2p engine built");
    engine.set_ice_state(IceConnectionState::Failed);

    let peer = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match events.receive().await {
                Ok(ConferenceEvent::P2pFailed { peer, .. }) => break peer,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("fallback must be observable");
    assert_eq!(peer, EndpointId::new("room@muc/20"));

    // The slot is vacated before the failure is published.
    assert!(controller.p2p_session().await.is_none());
    assert!(!controller.is_p2p_active());

    let terminate = signaling
        .wait_for_sent(JingleAction::SessionTerminate, Duration::from_millis(500))
        .await
        .expect("failure announced to the peer");
    assert_eq!(
        terminate.reason.as_ref().map(|r| r.condition),
        Some(TerminateReason::ConnectivityError)
    );

    // No automatic retry; only membership changes re-evaluate.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(signaling.sent_with_action(JingleAction::SessionInitiate).await.len(), 1);
}

#[test_log::test(tokio::test)]
async fn established_p2p_media_switches_the_active_transport() {
    let (controller, _signaling, factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/aaa").await;

    // Relay session first, adopted from an inbound initiate.
    let offer = rmeet_jingle_core::JinglePayload::new(
        JingleAction::SessionInitiate,
        rmeet_jingle_core::SessionId::new("jvb1"),
    )
    .with_initiator(focus_id());
    controller
        .handle_incoming_initiate(
            focus_id(),
            rmeet_session_core::SessionTopology::Bridged,
            offer,
        )
        .await;
    let bridged = controller.bridged_session().await.expect("bridged session adopted");
    assert_eq!(
        controller.active_session().await.map(|s| s.id().clone()),
        Some(bridged.id().clone()),
        "bridge carries media before p2p connects"
    );

    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/bbb")))
        .await;
    let p2p = controller.p2p_session().await.expect("direct session started");
    let mut events = controller.subscribe();

    // Complete the direct negotiation, then let its ICE connect.
    p2p.set_answer(remote_answer()).await.expect("answer applies");
    let engine = factory.engines().into_iter().last().expect("p2p engine built");
    engine.set_ice_state(IceConnectionState::Connected);

    // The switch is published before the establishment notice.
    let mut switched = false;
    tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match events.receive().await {
                Ok(ConferenceEvent::MediaSessionActiveChanged { p2p_active: true }) => {
                    switched = true;
                }
                Ok(ConferenceEvent::P2pEstablished { sid, .. }) => {
                    assert_eq!(&sid, p2p.id());
                    break;
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("p2p never became active");
    assert!(switched);

    assert!(controller.is_p2p_active());
    assert_eq!(
        controller.active_session().await.map(|s| s.id().clone()),
        Some(p2p.id().clone())
    );
}

#[test_log::test(tokio::test)]
async fn close_ends_every_session() {
    let (controller, signaling, _factory) = build_controller(short_debounce());
    join_as(&controller, "room@muc/aaa").await;

    let offer = rmeet_jingle_core::JinglePayload::new(
        JingleAction::SessionInitiate,
        rmeet_jingle_core::SessionId::new("jvb1"),
    )
    .with_initiator(focus_id());
    controller
        .handle_incoming_initiate(
            focus_id(),
            rmeet_session_core::SessionTopology::Bridged,
            offer,
        )
        .await;
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/bbb")))
        .await;
    assert!(controller.bridged_session().await.is_some());
    assert!(controller.p2p_session().await.is_some());

    controller.close().await;

    assert!(controller.bridged_session().await.is_none());
    assert!(controller.p2p_session().await.is_none());
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let terminates = signaling.sent_with_action(JingleAction::SessionTerminate).await;
        if terminates.len() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "both goodbyes must be announced");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
