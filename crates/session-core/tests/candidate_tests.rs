//! Trickle candidate handling: outbound batching windows, the
//! end-of-gathering marker, and inbound protocol filtering.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use rmeet_jingle_core::{
    CandidateKind, Content, ContentName, Creator, EndpointId, IceCandidate, IceTransport,
    JingleAction, MediaKind, MediaSection, SessionDescription, SessionId, TerminateReason,
};
use rmeet_session_core::testing::{
    FakeEngineFactory, FakePresenceDirectory, FakeSignalingTransport,
};
use rmeet_session_core::{
    JingleSession, SessionConfig, SessionEvent, SessionParams, SessionRole, SessionTopology,
};

async fn build_session(
    role: SessionRole,
    config: SessionConfig,
) -> (
    JingleSession,
    mpsc::UnboundedReceiver<SessionEvent>,
    Arc<FakeSignalingTransport>,
    FakeEngineFactory,
) {
    let factory = FakeEngineFactory::new();
    let signaling = Arc::new(FakeSignalingTransport::new());
    let presence = Arc::new(FakePresenceDirectory::new());
    let params = SessionParams {
        sid: SessionId::new("s1"),
        local: EndpointId::new("room@muc/me"),
        peer: EndpointId::new("room@muc/peer"),
        role,
        topology: SessionTopology::Bridged,
        config,
    };
    let (session, events) = JingleSession::new(params, &factory, signaling.clone(), presence)
        .await
        .expect("session builds");
    (session, events, signaling, factory)
}

fn remote_offer() -> SessionDescription {
    SessionDescription::new()
        .add_section(MediaSection::new(ContentName::audio(), MediaKind::Audio))
        .add_section(MediaSection::new(ContentName::video(), MediaKind::Video))
}

fn host_candidate(id: &str, protocol: &str, port: u16) -> IceCandidate {
    IceCandidate {
        id: id.to_string(),
        foundation: "1".to_string(),
        component: 1,
        protocol: protocol.to_string(),
        priority: 2_130_706_431,
        address: "192.0.2.10".parse().expect("addr"),
        port,
        kind: CandidateKind::Host,
        related_address: None,
        related_port: None,
        generation: 0,
    }
}

fn batch_window() -> SessionConfig {
    SessionConfig::default().with_candidate_batch_window(Duration::from_millis(30))
}

#[test_log::test(tokio::test)]
async fn candidates_in_one_window_flush_as_a_single_message() {
    let (session, _events, signaling, factory) =
        build_session(SessionRole::Initiator, batch_window()).await;
    session.invite(Vec::new()).await.expect("invite succeeds");

    let engine = factory.latest().expect("engine built");
    engine.discover_candidate(ContentName::audio(), host_candidate("a1", "udp", 10000));
    engine.discover_candidate(ContentName::audio(), host_candidate("a2", "udp", 10002));

    let info = signaling
        .wait_for_sent(JingleAction::TransportInfo, Duration::from_millis(500))
        .await
        .expect("batch flushed");
    assert_eq!(signaling.sent_with_action(JingleAction::TransportInfo).await.len(), 1);

    assert_eq!(info.contents.len(), 1);
    let content = &info.contents[0];
    assert_eq!(content.name, ContentName::audio());
    let transport = content.transport.as_ref().expect("transport block");

    // Discovery order survives the buffer.
    let ids: Vec<&str> = transport.candidates.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2"]);

    // Credentials come from the committed local description so the far end
    // can pair the candidates with the right generation.
    assert_eq!(transport.ufrag.as_deref(), Some("loc4l"));
    assert_eq!(transport.pwd.as_deref(), Some("s3cr3tpwd"));
    assert_eq!(transport.fingerprint.as_ref().map(|f| f.hash.as_str()), Some("sha-256"));
}

#[test_log::test(tokio::test)]
async fn end_of_gathering_marker_is_never_transmitted() {
    let (session, _events, signaling, factory) =
        build_session(SessionRole::Initiator, batch_window()).await;
    session.invite(Vec::new()).await.expect("invite succeeds");

    let engine = factory.latest().expect("engine built");
    engine.discover_candidate(ContentName::audio(), host_candidate("a1", "udp", 10000));
    engine.end_of_candidates();

    let info = signaling
        .wait_for_sent(JingleAction::TransportInfo, Duration::from_millis(500))
        .await
        .expect("real candidate still flushes");
    let transport = info.contents[0].transport.as_ref().expect("transport block");
    assert_eq!(transport.candidates.len(), 1);

    // A marker with nothing buffered produces no message at all.
    let (session, _events, signaling, factory) =
        build_session(SessionRole::Initiator, batch_window()).await;
    session.invite(Vec::new()).await.expect("invite succeeds");
    factory.latest().expect("engine built").end_of_candidates();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(signaling.sent_with_action(JingleAction::TransportInfo).await.is_empty());
}

#[test_log::test(tokio::test)]
async fn a_second_window_produces_a_second_batch() {
    let (session, _events, signaling, factory) =
        build_session(SessionRole::Initiator, batch_window()).await;
    session.invite(Vec::new()).await.expect("invite succeeds");

    let engine = factory.latest().expect("engine built");
    engine.discover_candidate(ContentName::audio(), host_candidate("a1", "udp", 10000));
    signaling
        .wait_for_sent(JingleAction::TransportInfo, Duration::from_millis(500))
        .await
        .expect("first batch");

    engine.discover_candidate(ContentName::video(), host_candidate("v1", "udp", 10004));
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let sent = signaling.sent_with_action(JingleAction::TransportInfo).await;
        if sent.len() == 2 {
            assert_eq!(sent[1].contents[0].name, ContentName::video());
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "second batch never flushed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[test_log::test(tokio::test)]
async fn inbound_batches_filter_disabled_protocols() {
    let config = SessionConfig::default().with_ice_tcp_disabled(true);
    let (session, _events, _signaling, factory) =
        build_session(SessionRole::Responder, config).await;
    session
        .accept_offer(remote_offer(), Vec::new())
        .await
        .expect("accept succeeds");

    let mixed = vec![Content::new(Creator::Initiator, ContentName::audio()).with_transport(
        IceTransport::new()
            .add_candidate(host_candidate("u1", "udp", 10000))
            .add_candidate(host_candidate("t1", "tcp", 10001)),
    )];
    session.add_ice_candidates(&mixed).await;

    let engine = factory.latest().expect("engine built");
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while engine.applied_candidates().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "udp candidate never applied");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let applied = engine.applied_candidates();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].1.id, "u1");

    // An all-filtered batch is dropped before it reaches the queue.
    let tcp_only = vec![Content::new(Creator::Initiator, ContentName::audio()).with_transport(
        IceTransport::new().add_candidate(host_candidate("t2", "tcp", 10003)),
    )];
    session.add_ice_candidates(&tcp_only).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.applied_candidates().len(), 1);
}

#[test_log::test(tokio::test)]
async fn terminated_sessions_drop_inbound_batches() {
    let (session, _events, _signaling, factory) =
        build_session(SessionRole::Responder, SessionConfig::default()).await;
    session
        .accept_offer(remote_offer(), Vec::new())
        .await
        .expect("accept succeeds");
    session.terminate(TerminateReason::Success, None, false).await;

    let contents = vec![Content::new(Creator::Initiator, ContentName::audio()).with_transport(
        IceTransport::new().add_candidate(host_candidate("late", "udp", 10000)),
    )];
    session.add_ice_candidates(&contents).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(factory
        .latest()
        .expect("engine built")
        .applied_candidates()
        .is_empty());
}
