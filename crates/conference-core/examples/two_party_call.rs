//! Two-party conference walkthrough using the in-crate fakes.
//!
//! Alice joins a room, Bob arrives, and the controller starts a direct
//! session because Alice sorts first. Bob's answer comes back through the
//! dispatcher, ICE connects, and media switches onto the direct path. When
//! Charlie joins the direct session is torn down again.
//!
//! Run with: cargo run --example two_party_call -p rmeet-conference-core

use std::sync::Arc;
use std::time::Duration;

use rmeet_conference_core::{
    ConferenceConfig, P2pConfig, Participant, ProtocolDispatcher, RoomEvent,
    SessionPolicyController,
};
use rmeet_jingle_core::{
    Content, ContentName, Creator, EndpointId, Fingerprint, IceParameters, IceTransport,
    IqRequest, JingleAction, JinglePayload, MediaDescription, MediaKind,
};
use rmeet_session_core::testing::{FakeEngineFactory, FakeSignalingTransport};
use rmeet_session_core::{IceConnectionState, LocalTrack};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let alice = EndpointId::new("room@muc/alice");
    let bob = EndpointId::new("room@muc/bob");
    let focus = EndpointId::new("room@muc/focus");

    let factory = Arc::new(FakeEngineFactory::new());
    let signaling = Arc::new(FakeSignalingTransport::new());
    let config = ConferenceConfig::new(focus)
        .with_p2p(P2pConfig::default().with_back_to_p2p_delay(Duration::from_millis(200)));
    let controller = SessionPolicyController::new(config, factory.clone(), signaling.clone());

    // Inbound stanzas flow through a channel into the dispatcher.
    let (iq_tx, iq_rx) = mpsc::unbounded_channel();
    let dispatcher = ProtocolDispatcher::new(controller.clone(), signaling.clone());
    tokio::spawn(dispatcher.run(iq_rx));

    // Print everything the conference reports.
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.receive().await {
            info!("📣 {:?}", event);
        }
    });

    controller
        .set_local_tracks(vec![
            LocalTrack::new(MediaKind::Audio),
            LocalTrack::new(MediaKind::Video),
        ])
        .await;

    info!("👋 Alice joins the room");
    controller
        .handle_room_event(RoomEvent::RoomJoined {
            local_id: alice.clone(),
        })
        .await;

    info!("👋 Bob joins; Alice sorts first, so she calls");
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new(bob.clone())))
        .await;

    let offer = signaling
        .wait_for_sent(JingleAction::SessionInitiate, Duration::from_secs(1))
        .await
        .ok_or_else(|| anyhow::anyhow!("no direct offer went out"))?;
    info!("📤 Offer {} sent to Bob", offer.sid);

    // Bob answers over the wire.
    let answer = JinglePayload::new(JingleAction::SessionAccept, offer.sid.clone())
        .with_responder(bob.clone())
        .add_content(answer_content(ContentName::audio(), MediaKind::Audio))
        .add_content(answer_content(ContentName::video(), MediaKind::Video));
    iq_tx.send(IqRequest::new(bob.clone(), alice.clone(), answer))?;

    // The fake engine connects as soon as we tell it to.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let engine = factory
        .latest()
        .ok_or_else(|| anyhow::anyhow!("no media engine built"))?;
    engine.set_ice_state(IceConnectionState::Checking);
    engine.set_ice_state(IceConnectionState::Connected);

    while !controller.is_p2p_active() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!("✅ Media now flows directly between Alice and Bob");

    info!("👋 Charlie joins; three participants need the bridge");
    controller
        .handle_room_event(RoomEvent::MemberJoined(Participant::new("room@muc/charlie")))
        .await;

    if signaling
        .wait_for_sent(JingleAction::SessionTerminate, Duration::from_secs(1))
        .await
        .is_some()
    {
        info!("📤 Direct session closed, media falls back to the bridge");
    }

    controller.close().await;
    info!("👋 Done");
    Ok(())
}

fn answer_content(name: ContentName, media: MediaKind) -> Content {
    let transport = IceTransport::new()
        .with_parameters(IceParameters::new("r3m0te", "s3cr3t"))
        .with_fingerprint(Fingerprint::new("sha-256", "AA:BB:CC:DD"));
    Content::new(Creator::Initiator, name)
        .with_description(MediaDescription::new(media))
        .with_transport(transport)
}
