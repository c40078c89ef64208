mod common;

use std::time::{Duration, Instant};

use common::{init_logger, start_fixture, wait_gone};
use devctl_core::error::DevctlError;
use devctl_core::runtime::{Client, OpContext};
use plugin_protocol::errors::{
    E_PROTOCOL_INVALID_HANDSHAKE, E_PROTOCOL_INVALID_JSON, E_PROTOCOL_STDOUT_CONTAMINATION,
    E_PROTOCOL_UNEXPECTED_FRAME, E_RUNTIME,
};
use serde_json::json;

#[tokio::test]
async fn ping_round_trip() {
    init_logger();
    let client = start_fixture("ok").await.unwrap();
    assert_eq!(client.id(), "ok");
    assert_eq!(client.handshake().plugin_name, "fixture-ok");

    let ctx = OpContext::new();
    let out = client.call(&ctx, "ping", json!({})).await.unwrap();
    assert_eq!(out["pong"], true);

    // Unknown ops are refused before anything is written.
    let err = client.call(&ctx, "nope", json!({})).await.unwrap_err();
    assert!(matches!(err, DevctlError::Unsupported { .. }), "{}", err);

    client.close(&ctx).await.unwrap();
    assert!(wait_gone(client.pid(), Duration::from_secs(1)).await);
}

#[tokio::test]
async fn call_deadline_is_enforced() {
    init_logger();
    let client = start_fixture("timeout").await.unwrap();
    let pid = client.pid();

    let ctx = OpContext::new().with_timeout(Duration::from_millis(250));
    let started = Instant::now();
    let err = client.call(&ctx, "ping", json!({})).await.unwrap_err();
    assert!(err.is_deadline(), "{}", err);
    assert!(started.elapsed() < Duration::from_secs(1));

    client.close(&OpContext::new()).await.unwrap();
    assert!(wait_gone(pid, Duration::from_secs(3)).await);
}

#[tokio::test]
async fn stdout_noise_before_handshake_is_rejected() {
    init_logger();
    let err = start_fixture("noisy").await.unwrap_err();
    assert_eq!(err.code(), Some(E_PROTOCOL_STDOUT_CONTAMINATION), "{}", err);
}

#[tokio::test]
async fn wrong_protocol_version_is_rejected() {
    init_logger();
    let err = start_fixture("invalid-handshake").await.unwrap_err();
    assert_eq!(err.code(), Some(E_PROTOCOL_INVALID_HANDSHAKE), "{}", err);
}

#[tokio::test]
async fn stream_delivers_events_until_end() {
    init_logger();
    let client = start_fixture("stream").await.unwrap();
    let ctx = OpContext::new();

    let (sid, mut events) = client
        .start_stream(&ctx, "logs.follow", json!({}))
        .await
        .unwrap();
    assert!(sid.starts_with("s-"));

    let mut messages = Vec::new();
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .expect("stream closed before its end event");
        assert_eq!(ev.stream_id, sid);
        if ev.is_end() {
            assert_eq!(ev.ok, Some(true));
            break;
        }
        messages.push(ev.message.clone().unwrap_or_default());
    }
    assert_eq!(messages, ["hello", "world"]);

    client.close(&ctx).await.unwrap();
}

/// Pings a fixture whose answer ends the session, then checks that the
/// in-flight call and every later call fail with `code`.
async fn session_ends_with(mode: &str, code: &str) {
    init_logger();
    let client = start_fixture(mode).await.unwrap();
    let pid = client.pid();
    let ctx = OpContext::new().with_timeout(Duration::from_secs(5));

    let err = client.call(&ctx, "ping", json!({})).await.unwrap_err();
    assert_eq!(err.code(), Some(code), "{}", err);

    let started = Instant::now();
    let again = client.call(&ctx, "ping", json!({})).await.unwrap_err();
    assert_eq!(again.code(), Some(code), "{}", again);
    assert!(started.elapsed() < Duration::from_millis(500));

    let _ = client.close(&OpContext::new()).await;
    assert!(wait_gone(pid, Duration::from_secs(3)).await);
}

#[tokio::test]
async fn garbage_after_handshake_ends_the_session() {
    session_ends_with("garbage", E_PROTOCOL_INVALID_JSON).await;
}

#[tokio::test]
async fn second_handshake_ends_the_session() {
    session_ends_with("rehandshake", E_PROTOCOL_UNEXPECTED_FRAME).await;
}

#[tokio::test]
async fn plugin_exit_fails_the_call_in_flight() {
    session_ends_with("die", E_RUNTIME).await;
}
