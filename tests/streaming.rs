//! Held connections over a real listener.

use std::time::Duration;

use reqwest::StatusCode;
use scriptd::config::ServerConfig;

mod common;

use common::EventReader;

const SCRIPT: &str = r#"
fn left(h) {
    route("GET", "/left/" + h, "respond(\"gone\")");
    for c in connections() {
        respond(c, h + " left");
        flush(c);
    }
}

route("GET", "/room/:name", "let h = connection::hold(param(\"name\")); connection::on_close(h, Fn(\"left\")); flush();");
route("GET", "/anon", "connection::hold(); flush();");
route("POST", "/say", "for c in connections() { respond(c, request::body()); flush(c); }");
"#;

#[tokio::test]
async fn test_room_receives_broadcast_until_closed() {
    let server = common::start_server(SCRIPT).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/room/room")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/event-stream");
    server.wait_for_connection("room").await;

    server.eval(r#"respond("room", "ping"); flush("room");"#).await;
    let mut events = EventReader::new(res);
    assert_eq!(
        events.next_record().await.as_deref(),
        Some("event: message\ndata: ping\n\n")
    );

    server.eval(r#"connection::close("room")"#).await;
    assert_eq!(events.next_record().await, None);
    assert!(server.registry.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_from_request() {
    let server = common::start_server(SCRIPT).await;
    let client = reqwest::Client::new();

    let a = client.get(server.url("/room/a")).send().await.unwrap();
    let b = client.get(server.url("/anon")).send().await.unwrap();
    server.wait_for_connection("a").await;
    let mut a = EventReader::new(a);
    let mut b = EventReader::new(b);
    assert_eq!(server.registry.len(), 2);

    let res = client
        .post(server.url("/say"))
        .body("hello\nall")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let expected = "event: message\ndata: hello\ndata: all\n\n";
    assert_eq!(a.next_record().await.as_deref(), Some(expected));
    assert_eq!(b.next_record().await.as_deref(), Some(expected));

    server.stop().await;
    assert_eq!(a.next_record().await, None);
    assert_eq!(b.next_record().await, None);
}

#[tokio::test]
async fn test_disconnect_runs_close_callback() {
    let mut config = ServerConfig::default();
    config.streaming.keepalive_secs = 1;
    let server = common::start_server_with(config, SCRIPT).await;
    let client = reqwest::Client::new();

    let watcher = client.get(server.url("/room/watcher")).send().await.unwrap();
    let quitter = client.get(server.url("/room/quitter")).send().await.unwrap();
    server.wait_for_connection("quitter").await;
    let mut watcher = EventReader::new(watcher);

    drop(quitter);

    // Heartbeats interleave with the callback's broadcast.
    let mut record = String::new();
    for _ in 0..10 {
        record = watcher.next_record().await.unwrap();
        if record.starts_with("event:") {
            break;
        }
    }
    assert_eq!(record, "event: message\ndata: quitter left\n\n");

    for _ in 0..100 {
        if server.registry.get("quitter").is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(server.registry.get("quitter").is_none());
    assert!(server.registry.get("watcher").is_some());

    let res = client.get(server.url("/left/quitter")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "gone");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_command_ends_held_streams() {
    let server = common::start_server(SCRIPT).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/room/r")).send().await.unwrap();
    server.wait_for_connection("r").await;
    let mut events = EventReader::new(res);

    server.eval("shutdown()").await;
    assert_eq!(events.next_record().await, None);
    tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
}
