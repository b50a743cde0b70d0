//! Integration tests: connection lifecycle and the device-side hub link
//! over a real TCP connection on localhost.

use std::time::Duration;

use chrono::Utc;
use kiosk_core::protocol::{
    DeviceTelemetrySample, Hello, MediaType, Payload, RemoteCommand, ScheduleEntry,
    ScheduleRequest, ScheduleSnapshot,
};
use kiosk_core::{
    Command, Connection, ConnectionInfo, HubLink, KioskError, Packet,
    ScheduleSource,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, ConnectionInfo) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info = ConnectionInfo::new(addr.ip().to_string(), addr.port());
    (listener, info)
}

async fn recv_skip_keepalive(conn: &mut Connection) -> Option<Packet> {
    loop {
        let pkt = conn.recv().await?;
        if !pkt.is_keepalive() {
            return Some(pkt);
        }
    }
}

async fn next_packet(conn: &mut Connection) -> Packet {
    tokio::time::timeout(Duration::from_secs(5), recv_skip_keepalive(conn))
        .await
        .expect("timeout")
        .expect("connection closed")
}

/// Connect a `HubLink` to a hand-driven hub connection and complete the
/// handshake. Returns the link, its command stream, and the hub side.
async fn linked_pair() -> (HubLink, mpsc::Receiver<RemoteCommand>, Connection) {
    let (listener, info) = ephemeral_listener().await;
    let (link, commands) = HubLink::new(Hello::new("dev-1", "lobby"), Duration::from_secs(2));

    let device = tokio::spawn({
        let link = link.clone();
        async move {
            let conn = Connection::connect(&info).await.unwrap();
            link.attach(conn).await
        }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut hub = Connection::new(stream);

    let hello = next_packet(&mut hub).await;
    assert_eq!(hello.command().unwrap(), Command::Hello);
    let device_hello = Hello::from_packet(&hello).unwrap();
    assert_eq!(device_hello.device_id, "dev-1");
    assert_eq!(device_hello.screen_id, "lobby");

    let mut reply = Hello::new("hub", "");
    reply.capabilities.media_resolve = false;
    hub.send(reply.into_response(hello.request_id()).unwrap())
        .await
        .unwrap();

    let negotiated = device.await.unwrap().unwrap();
    assert!(!negotiated.media_resolve);
    assert!(negotiated.telemetry);

    (link, commands, hub)
}

// ── Connection lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn connection_ping_round_trip() {
    let (listener, info) = ephemeral_listener().await;

    let device = tokio::spawn({
        let info = info.clone();
        async move { Connection::connect(&info).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let hub = Connection::new(stream);
    let mut device = device.await.unwrap();

    let ping = Packet::new_command(1, Command::Ping, Vec::new()).unwrap();
    hub.send(ping).await.unwrap();

    let pkt = next_packet(&mut device).await;
    assert_eq!(pkt.request_id(), 1);
    assert_eq!(pkt.command().unwrap(), Command::Ping);
    assert!(!pkt.is_response());
}

#[tokio::test]
async fn packets_arrive_in_order() {
    let (listener, info) = ephemeral_listener().await;

    let device = tokio::spawn({
        let info = info.clone();
        async move { Connection::connect(&info).await.unwrap() }
    });

    let (stream, _) = listener.accept().await.unwrap();
    let hub = Connection::new(stream);
    let mut device = device.await.unwrap();

    for i in 1u64..=5 {
        let cmd = Packet::new_command(i, Command::Ping, Vec::new()).unwrap();
        hub.send(cmd).await.unwrap();
    }
    for i in 1u64..=5 {
        assert_eq!(next_packet(&mut device).await.request_id(), i);
    }
}

// ── Hub link ─────────────────────────────────────────────────────

#[tokio::test]
async fn link_handshake_brings_link_online() {
    let (link, _commands, _hub) = linked_pair().await;
    assert!(link.is_online());
    assert!(link.phase().await.is_connected());
    assert!(link.capabilities().await.is_some());
}

#[tokio::test]
async fn link_schedule_request_round_trip() {
    let (link, _commands, mut hub) = linked_pair().await;

    let hub_task = tokio::spawn(async move {
        let request = next_packet(&mut hub).await;
        assert_eq!(request.command().unwrap(), Command::ScheduleFetch);
        let ScheduleRequest { screen_id } = ScheduleRequest::from_packet(&request).unwrap();
        let snapshot = ScheduleSnapshot {
            screen_id,
            entries: vec![ScheduleEntry::new(
                1,
                "ad-1",
                MediaType::Video,
                Utc::now() + chrono::Duration::seconds(60),
                Some(30),
            )],
            generated_at: Utc::now(),
        };
        hub.send(snapshot.into_response(request.request_id()).unwrap())
            .await
            .unwrap();
        hub
    });

    let snapshot = link.fetch_schedule("lobby").await.unwrap();
    assert_eq!(snapshot.screen_id, "lobby");
    assert_eq!(snapshot.entries.len(), 1);
    assert_eq!(snapshot.entries[0].content_ref, "ad-1");
    let _hub = hub_task.await.unwrap();
}

#[tokio::test]
async fn link_error_response_is_remote_error() {
    let (link, _commands, mut hub) = linked_pair().await;

    let hub_task = tokio::spawn(async move {
        let request = next_packet(&mut hub).await;
        let reply =
            Packet::new_error_response(request.request_id(), Command::ScheduleFetch, "unknown screen")
                .unwrap();
        hub.send(reply).await.unwrap();
        hub
    });

    let err = link
        .request::<_, ScheduleSnapshot>(&ScheduleRequest {
            screen_id: "nowhere".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::Remote(ref reason) if reason == "unknown screen"));
    let _hub = hub_task.await.unwrap();
}

#[tokio::test]
async fn link_request_times_out_without_answer() {
    let (listener, info) = ephemeral_listener().await;
    let (link, _commands) = HubLink::new(Hello::new("dev-1", "lobby"), Duration::from_millis(200));

    let device = tokio::spawn({
        let link = link.clone();
        async move { link.attach(Connection::connect(&info).await.unwrap()).await }
    });
    let (stream, _) = listener.accept().await.unwrap();
    let mut hub = Connection::new(stream);
    let hello = next_packet(&mut hub).await;
    hub.send(Hello::new("hub", "").into_response(hello.request_id()).unwrap())
        .await
        .unwrap();
    device.await.unwrap().unwrap();

    let err = link
        .request::<_, ScheduleSnapshot>(&ScheduleRequest {
            screen_id: "lobby".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::Timeout(_)));
    // The link survives a slow hub.
    assert!(link.is_online());
}

#[tokio::test]
async fn link_forwards_commands_and_heartbeats() {
    let (link, mut commands, mut hub) = linked_pair().await;

    let cmd = RemoteCommand::new(7, "dev-1", "lobby", "refresh_schedule");
    hub.send(cmd.into_command(100).unwrap()).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, cmd);

    let sample = DeviceTelemetrySample {
        device_id: "dev-1".into(),
        screen_id: "lobby".into(),
        status: Default::default(),
        mode: Default::default(),
        signal_strength: None,
        cpu_utilization: 1.0,
        memory_utilization: 2.0,
        storage_utilization: 3.0,
        last_heartbeat_at: Utc::now(),
        playback: Default::default(),
        schedule_stale: false,
        emergency_activations: 0,
        last_error: None,
    };
    link.notify(&sample).await.unwrap();
    let beat = next_packet(&mut hub).await;
    assert_eq!(beat.command().unwrap(), Command::Heartbeat);
    assert_eq!(DeviceTelemetrySample::from_packet(&beat).unwrap(), sample);
}

#[tokio::test]
async fn goodbye_from_hub_takes_link_offline() {
    let (link, _commands, hub) = linked_pair().await;
    let mut online = link.subscribe_online();
    assert!(*online.borrow_and_update());

    hub.send(Packet::new_command(0, Command::Goodbye, Vec::new()).unwrap())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), link.disconnected())
        .await
        .expect("link stayed online");
    assert!(!link.is_online());
    assert!(link.phase().await.is_disconnected());

    let err = link
        .notify(&ScheduleRequest {
            screen_id: "lobby".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, KioskError::NotConnected));
}

#[tokio::test]
async fn dropped_hub_connection_takes_link_offline() {
    let (link, _commands, hub) = linked_pair().await;
    drop(hub);

    // The hub's reader notices on the next device keepalive.
    tokio::time::timeout(Duration::from_secs(15), link.disconnected())
        .await
        .expect("link stayed online");
    assert!(!link.is_online());
}
