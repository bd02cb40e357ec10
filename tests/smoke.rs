use klyra_client::SyncClient;
use klyra_core::{EntityId, Vec2};
use klyra_net::ServerMessage;
use klyra_testkit::{
    move_to, pushed, spawn_avatar, JsonlSink, RecordingPublisher, TrafficRecord,
};
use std::time::Duration;

#[test]
fn scripted_session_traffic_can_be_logged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut sink = JsonlSink::create(dir.path().join("traffic.jsonl")).expect("can create log");
    let mut client = SyncClient::default();
    let wire = RecordingPublisher::new();

    let inbound = [
        spawn_avatar(EntityId(2), 0.0, 0.0),
        ServerMessage::EntityMoved(move_to(EntityId(2), 24.0, 0.0)),
    ];
    for message in inbound {
        sink.write(&TrafficRecord::inbound(&message).unwrap())
            .expect("can write event");
        client.handle_event(&pushed(message));
    }

    client.send_movement(Vec2::new(10.0, 10.0));
    client.flush_to(&wire);
    for message in wire.sent() {
        sink.write(&TrafficRecord::outbound(&message).unwrap())
            .expect("can write event");
    }

    for _ in 0..10 {
        client.frame(Duration::from_millis(16), &[]);
    }

    assert_eq!(sink.written(), 3);
    assert_eq!(
        client.avatars().get(EntityId(2)).unwrap().visual(),
        Vec2::new(24.0, 0.0)
    );
}
