//! Scripted sessions against the sync client.

use klyra_client::{AvatarState, CreatureState, PetState, SessionNotice, SyncClient, SyncConfig};
use klyra_core::{EntityId, PlayerId, Vec2};
use klyra_net::{
    ClientMessage, DespawnReason, FlushOutcome, IntentKind, IntentPayload, Movement,
    NetworkConfig, RemoteState, ServerConnection, ServerEndpoint, ServerMessage,
};
use klyra_testkit::{
    despawn, move_by, move_to, pet_update, pushed, spawn_avatar, spawn_creature, state_change,
    RecordingPublisher,
};
use std::time::Duration;

const FRAME: Duration = Duration::from_millis(16);

#[test]
fn remote_entities_follow_server_pushes() {
    let mut client = SyncClient::default();
    let alice = EntityId(20);
    let wolf = EntityId(30);

    client.handle_event(&pushed(spawn_avatar(alice, 0.0, 0.0)));
    client.handle_event(&pushed(spawn_creature(wolf, 100.0, 100.0)));
    client.handle_event(&pushed(ServerMessage::EntitiesMoved(vec![
        move_to(alice, 30.0, 0.0),
        move_by(wolf, -12.0, 0.0),
    ])));

    for _ in 0..30 {
        client.frame(FRAME, &[]);
    }

    let avatar = client.avatars().get(alice).unwrap();
    assert_eq!(avatar.visual(), Vec2::new(30.0, 0.0));
    assert!(!avatar.facing().is_flipped());

    let creature = client.creatures().get(wolf).unwrap();
    assert_eq!(creature.visual(), Vec2::new(88.0, 100.0));
    assert!(creature.facing().is_flipped());
    assert_eq!(creature.state(), CreatureState::Idle);

    client.handle_event(&pushed(state_change(wolf, RemoteState::Attacking)));
    assert_eq!(
        client.creatures().get(wolf).unwrap().animation_key(),
        "minotaur_attack"
    );

    client.handle_event(&pushed(despawn(wolf, DespawnReason::Died)));
    assert!(client.creatures().is_empty());
}

#[test]
fn remote_pet_tracks_snapshots() {
    let mut client = SyncClient::default();
    let owner = PlayerId(21);
    client.handle_event(&pushed(spawn_avatar(owner.into(), 50.0, 50.0)));

    client.handle_event(&pushed(pet_update(owner, 90.0, 50.0, RemoteState::Sleeping)));
    let pet = client.pets().get(owner.into()).unwrap();
    assert_eq!(pet.visual(), Vec2::new(90.0, 50.0));
    assert_eq!(pet.state(), PetState::Sleeping);
    assert_eq!(pet.animation_key(), "red_panda_sleep");

    client.handle_event(&pushed(pet_update(owner, 110.0, 50.0, RemoteState::Following)));
    for _ in 0..20 {
        client.frame(FRAME, &[]);
    }
    let pet = client.pets().get(owner.into()).unwrap();
    assert_eq!(pet.visual(), Vec2::new(110.0, 50.0));

    client.handle_event(&pushed(ServerMessage::PetUnequipped { owner }));
    assert!(client.pets().is_empty());
}

#[test]
fn pet_snapshot_for_stranger_is_ignored() {
    let mut client = SyncClient::default();
    client.handle_event(&pushed(pet_update(
        PlayerId(99),
        1.0,
        1.0,
        RemoteState::Idle,
    )));
    assert!(client.pets().is_empty());
}

#[test]
fn outage_defers_and_coalesces_movement() {
    let mut client = SyncClient::new(SyncConfig::default());
    let wire = RecordingPublisher::new();

    client.send_movement(Vec2::new(100.0, 100.0));
    assert_eq!(client.flush_to(&wire), FlushOutcome::Sent(1));

    wire.set_connected(false);
    client.send_movement(Vec2::new(110.0, 100.0));
    client.send_movement(Vec2::new(110.5, 100.2));
    client.send_movement(Vec2::new(120.0, 105.0));
    assert!(matches!(client.flush_to(&wire), FlushOutcome::Deferred(_)));
    assert_eq!(wire.envelopes().len(), 1);

    wire.set_connected(true);
    assert!(matches!(client.flush_to(&wire), FlushOutcome::Sent(_)));
    assert_eq!(client.flush_to(&wire), FlushOutcome::Empty);

    let mut replayed = None;
    for envelope in wire.envelopes() {
        for entry in envelope.entries {
            if let IntentPayload::Move(movement) = entry.data {
                replayed = Some(movement.apply(replayed.unwrap_or(Vec2::ZERO)));
            }
        }
    }
    assert_eq!(replayed, Some(Vec2::new(120.0, 105.0)));
}

#[test]
fn batched_entries_keep_insertion_order() {
    let mut client = SyncClient::default();
    let wire = RecordingPublisher::new();

    client.send_movement(Vec2::ZERO);
    client.queue_update(IntentKind::Attack, IntentPayload::Opaque(vec![1]));
    client.send_movement(Vec2::new(10.0, 0.0));
    client.flush_to(&wire);

    let envelopes = wire.envelopes();
    assert_eq!(envelopes.len(), 1);
    let kinds: Vec<_> = envelopes[0].entries.iter().map(|entry| entry.kind).collect();
    assert_eq!(
        kinds,
        vec![IntentKind::Move, IntentKind::Attack, IntentKind::Move]
    );
    assert_eq!(
        envelopes[0].entries[2].data,
        IntentPayload::Move(Movement::Delta {
            delta: Vec2::new(10.0, 0.0)
        })
    );
}

#[test]
fn server_notices_surface_to_caller() {
    let mut client = SyncClient::default();
    let notice = client.handle_event(&pushed(ServerMessage::ServerShutdown {
        message: "maintenance".to_string(),
    }));
    assert_eq!(
        notice,
        Some(SessionNotice::Shutdown("maintenance".to_string()))
    );
}

#[tokio::test]
async fn loopback_session_syncs_both_ways() {
    let server =
        ServerEndpoint::bind("127.0.0.1:0".parse().unwrap()).expect("Failed to bind server");
    let server_addr = server.local_addr();

    let server_handle = tokio::spawn(async move {
        let incoming = server.accept().await.expect("No incoming connection");
        let connection = incoming.await.expect("Failed to accept connection");
        let mut conn = ServerConnection::new(connection);
        conn.accept_handshake().await.expect("handshake");
        conn.welcome(PlayerId(1), None).await.expect("welcome");

        conn.send(spawn_avatar(EntityId(2), 10.0, 10.0))
            .await
            .expect("spawn");
        // Our own avatar echoed back must not be reconciled.
        conn.send(spawn_avatar(EntityId(1), 0.0, 0.0))
            .await
            .expect("echo");

        let envelope = loop {
            if let ClientMessage::Batch(envelope) = conn.recv().await.expect("recv") {
                break envelope;
            }
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        envelope
    });

    let mut client = SyncClient::default();
    let config = NetworkConfig {
        server_addr,
        ..NetworkConfig::default()
    };
    let welcome = client.connect(&config).await.expect("connect");
    assert_eq!(welcome.player_id, PlayerId(1));
    assert_eq!(client.local_id(), Some(EntityId(1)));

    client.send_movement(Vec2::new(5.0, 5.0));

    // Pumping applies what already arrived without waiting on the flush timer.
    for _ in 0..100 {
        assert_eq!(client.pump(), None);
        if client.avatars().contains(EntityId(2)) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(client.avatars().contains(EntityId(2)));
    assert_eq!(client.batcher().len(), 1);

    for _ in 0..200 {
        if server_handle.is_finished() && client.avatars().contains(EntityId(2)) {
            break;
        }
        let _ = tokio::time::timeout(Duration::from_millis(100), client.step()).await;
    }

    let envelope = server_handle.await.expect("server task");
    assert_eq!(
        envelope.entries[0].data,
        IntentPayload::Move(Movement::Absolute {
            position: Vec2::new(5.0, 5.0)
        })
    );
    assert!(client.avatars().contains(EntityId(2)));
    assert!(!client.avatars().contains(EntityId(1)));
    assert_eq!(
        client.avatars().get(EntityId(2)).unwrap().state(),
        AvatarState::Idle
    );

    client.shutdown().await;
    assert!(!client.is_connected());
    assert!(client.avatars().is_empty());
}
