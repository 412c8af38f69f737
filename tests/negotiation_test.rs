//! Negotiation races: candidate buffering, glare, timeouts, and the
//! outbound candidate path, driven through the full controller over the
//! in-process signaling hub.

mod harness;

use std::time::Duration;

use harness::{candidate, fake_sdp, members, Observer, TestParticipant};
use roomcall::peer::NegotiationState;
use roomcall::signaling::{LocalSignalingHub, SignalMessage};
use roomcall::{CallConfig, CallEvent, CloseReason, RoomMember};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

fn offer_from(id: &str, to: &str) -> SignalMessage {
    SignalMessage::Offer {
        from: id.into(),
        from_name: id.to_uppercase(),
        to: to.into(),
        signal: RTCSessionDescription::offer(fake_sdp()).unwrap(),
    }
}

fn candidate_from(id: &str, to: &str, n: u32) -> SignalMessage {
    SignalMessage::IceCandidate {
        from: id.into(),
        from_name: id.to_uppercase(),
        to: to.into(),
        signal: candidate(n),
    }
}

#[tokio::test]
async fn test_candidate_racing_ahead_of_offer_is_queued_then_flushed_once() {
    let hub = LocalSignalingHub::new();
    let alice = TestParticipant::join(&hub, "study", "alice", "ALICE").await;
    let mut observer = Observer::join(&hub, "study").await;

    // Active with no peers yet; the offer from xavier is still "in flight"
    alice.controller.start_call(&[]).await.unwrap();

    observer.inject(candidate_from("xavier", "alice", 1)).await;
    wait_until!("entry created for early candidate", {
        alice.controller.registry().contains(&"xavier".into()).await
    });

    let entry = alice.controller.registry().get(&"xavier".into()).await.unwrap();
    assert_eq!(entry.state().await, NegotiationState::New);
    let transport = alice.factory.transport_for(&"xavier".into()).unwrap();
    assert!(transport.applied().is_empty(), "candidate must stay queued");

    observer.inject(offer_from("xavier", "alice")).await;
    wait_until!("negotiation with xavier completed", {
        entry.state().await == NegotiationState::Connected
    });
    assert_eq!(transport.applied().len(), 1, "queued candidate flushed");

    wait_until!("answer published", {
        let seen = observer.drain();
        Observer::count_kind(&seen, "answer") == 1
    });

    // Exactly once: nothing re-applies the flushed candidate
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.applied().len(), 1);
}

#[tokio::test]
async fn test_candidates_flush_in_arrival_order() {
    let hub = LocalSignalingHub::new();
    let alice = TestParticipant::join(&hub, "study", "alice", "ALICE").await;
    let observer = Observer::join(&hub, "study").await;

    alice.controller.start_call(&[]).await.unwrap();

    for n in 1..=3 {
        observer.inject(candidate_from("xavier", "alice", n)).await;
    }
    observer.inject(offer_from("xavier", "alice")).await;

    let transport = loop {
        if let Some(t) = alice.factory.transport_for(&"xavier".into()) {
            break t;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    wait_until!("all candidates flushed", transport.applied().len() == 3);

    let applied = transport.applied();
    for (i, candidate) in applied.iter().enumerate() {
        assert!(
            candidate.starts_with(&format!("candidate:{}", i + 1)),
            "candidate {i} applied out of order: {candidate}"
        );
    }
}

#[tokio::test]
async fn test_offer_glare_restarts_as_callee() {
    let hub = LocalSignalingHub::new();
    let alice = TestParticipant::join(&hub, "study", "alice", "ALICE").await;
    let mut observer = Observer::join(&hub, "study").await;

    let bob = RoomMember {
        participant: "bob".into(),
        display_name: "BOB".to_string(),
    };
    alice.controller.start_call(&[bob]).await.unwrap();

    let entry = alice.controller.registry().get(&"bob".into()).await.unwrap();
    assert_eq!(entry.state().await, NegotiationState::HaveLocalOffer);
    assert!(entry.is_initiator());

    // Bob offered at the same time: last offer wins
    observer.inject(offer_from("bob", "alice")).await;
    wait_until!("entry restarted as callee and connected", {
        match alice.controller.registry().get(&"bob".into()).await {
            Some(entry) => {
                !entry.is_initiator() && entry.state().await == NegotiationState::Connected
            }
            None => false,
        }
    });

    let transports = alice.factory.transports_for(&"bob".into());
    assert_eq!(transports.len(), 2, "glare must tear down and recreate");
    assert!(transports[0].is_closed());
    assert!(!transports[1].is_closed());

    wait_until!("answer published", {
        let seen = observer.drain();
        Observer::count_kind(&seen, "answer") == 1
    });
    assert_eq!(alice.controller.registry().len().await, 1);
}

#[tokio::test]
async fn test_generated_candidates_are_published_unicast() {
    let hub = LocalSignalingHub::new();
    let alice = TestParticipant::join(&hub, "study", "alice", "ALICE").await;
    let mut observer = Observer::join(&hub, "study").await;

    let bob = RoomMember {
        participant: "bob".into(),
        display_name: "BOB".to_string(),
    };
    alice.controller.start_call(&[bob]).await.unwrap();
    observer.drain();

    let transport = alice.factory.transport_for(&"bob".into()).unwrap();
    transport.emit_candidate(9);

    wait_until!("candidate published", {
        let seen = observer.drain();
        seen.iter().any(|m| {
            m.kind() == "ice-candidate"
                && m.from().as_str() == "alice"
                && m.to().map(|t| t.as_str()) == Some("bob")
        })
    });
}

#[tokio::test]
async fn test_transport_failure_closes_only_that_peer() {
    let hub = LocalSignalingHub::new();
    let mut alice = TestParticipant::join(&hub, "study", "alice", "ALICE").await;

    alice.controller.start_call(&members()).await.unwrap();
    assert_eq!(alice.controller.registry().len().await, 2);
    alice.drain_events();

    let bob_transport = alice.factory.transport_for(&"bob".into()).unwrap();
    bob_transport.emit_failure();

    wait_until!("failed peer removed", {
        !alice.controller.registry().contains(&"bob".into()).await
    });

    assert!(alice.controller.registry().contains(&"carol".into()).await);
    let events = alice.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::PeerUnreachable {
            display_name,
            reason: CloseReason::TransportFailed,
            ..
        } if display_name == "BOB"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_timeout_closes_unanswered_peer() {
    let mut config = CallConfig::default();
    config.negotiation_timeout_secs = 5;

    let hub = LocalSignalingHub::new();
    let mut alice =
        TestParticipant::join_with_config(&hub, "study", "alice", "ALICE", config).await;

    let bob = RoomMember {
        participant: "bob".into(),
        display_name: "BOB".to_string(),
    };
    alice.controller.start_call(&[bob]).await.unwrap();
    assert_eq!(alice.controller.registry().len().await, 1);

    // Bob never answers; the watchdog closes the entry
    wait_until!("unanswered peer removed", {
        alice.controller.registry().is_empty().await
    });

    let events = alice.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        CallEvent::PeerUnreachable {
            reason: CloseReason::NegotiationTimeout,
            ..
        }
    )));
}

#[tokio::test]
async fn test_buffered_offer_and_candidate_replay_on_accept() {
    let hub = LocalSignalingHub::new();
    let mut bob = TestParticipant::join(&hub, "study", "bob", "BOB").await;
    let mut observer = Observer::join(&hub, "study").await;

    observer
        .inject(SignalMessage::CallInitiated {
            from: "xavier".into(),
            from_name: "XAVIER".to_string(),
        })
        .await;
    wait_until!("incoming call surfaced", {
        bob.drain_events()
            .iter()
            .any(|e| matches!(e, CallEvent::IncomingCall { .. }))
    });

    // Candidate and offer race ahead of the accept; both are buffered
    observer.inject(candidate_from("xavier", "bob", 1)).await;
    observer.inject(offer_from("xavier", "bob")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bob.controller.registry().is_empty().await);

    bob.controller.accept_call().await.unwrap();
    wait_until!("buffered offer answered", {
        let seen = observer.drain();
        Observer::count_kind(&seen, "answer") == 1
    });

    let transport = bob.factory.transport_for(&"xavier".into()).unwrap();
    assert_eq!(transport.applied().len(), 1, "buffered candidate flushed once");
}
