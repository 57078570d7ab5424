// ABOUTME: End-to-end relay scenarios exercised through the peer multiplexer
// ABOUTME: Covers round-trips, timeouts, takeover, fan-in, and the HTTP probes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use switchboard::client::events::{ClientEvent, EventKind};
use switchboard::client::{ConnectionState, PeerClient};
use switchboard::config::{PeerConfig, RelayConfig};
use switchboard::errors::ErrorKind;
use switchboard::relay::RelayServer;
use switchboard::schema::{Content, ToolDescriptor, ToolResult};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Bind a relay on an ephemeral port and return its base URL
async fn spawn_relay(request_timeout_ms: u64) -> String {
    let config = RelayConfig {
        port: 0,
        host: "127.0.0.1".to_owned(),
        keep_alive_ms: 5_000,
        request_timeout_ms,
        debug: false,
    };
    let server = RelayServer::new(config);
    let app = server.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{address}")
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn echo_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "echo",
        "Echo the message argument back as text",
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        }),
    )
}

async fn spawn_echo_provider(base: &str, session: &str) -> PeerClient {
    let provider = PeerClient::provider(PeerConfig::new(base).with_session_id(session));
    provider
        .register_tool(echo_descriptor(), |args: Map<String, Value>| async move {
            Ok(args.get("message").cloned().unwrap_or(Value::Null))
        })
        .await;
    provider.attach().await.unwrap();
    provider.register_tools(None).await.unwrap();
    provider
}

#[tokio::test]
async fn test_echo_round_trip() {
    let base = spawn_relay(5_000).await;
    let _provider = spawn_echo_provider(&base, "echo-session").await;

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    let tools = caller.join_session("echo-session").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let result = caller
        .call_tool("echo", Some(object(json!({ "message": "hi" }))))
        .await
        .unwrap();

    assert!(!result.is_error);
    assert_eq!(result.content, vec![Content::text("hi")]);
}

#[tokio::test]
async fn test_join_missing_session_is_a_session_error() {
    let base = spawn_relay(5_000).await;

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();

    let error = caller.join_session("Z").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Session);
    assert!(error.message.contains('Z'), "message was: {}", error.message);
}

#[tokio::test]
async fn test_tool_not_found_carries_both_shapes() {
    let base = spawn_relay(5_000).await;

    // Provider with an empty catalogue
    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("T"));
    provider.attach().await.unwrap();
    provider.register_tools(Some(Vec::new())).await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("T").await.unwrap();

    let response = caller
        .request("tools/call", Some(json!({ "name": "x", "arguments": {} })))
        .await
        .unwrap();

    let result: ToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
    assert!(result.is_error);
    assert!(matches!(
        &result.content[0],
        Content::Text { text } if text.contains('x')
    ));
    assert_eq!(response.error.unwrap().code, -32004);
}

#[tokio::test]
async fn test_forward_timeout_fails_with_timeout_code() {
    let base = spawn_relay(200).await;

    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("D"));
    provider
        .register_tool(
            ToolDescriptor::new("slow", "Never finishes", json!({ "type": "object", "properties": {} })),
            |_args: Map<String, Value>| async move {
                sleep(Duration::from_secs(3_600)).await;
                Ok(Value::Null)
            },
        )
        .await;
    provider.attach().await.unwrap();
    provider.register_tools(None).await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("D").await.unwrap();

    let started = Instant::now();
    let response = caller
        .request("tools/call", Some(json!({ "name": "slow", "arguments": {} })))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.error.unwrap().code, -32001);
    assert!(elapsed < Duration::from_millis(1_500), "took {elapsed:?}");
}

#[tokio::test]
async fn test_tools_list_answers_from_cache_after_provider_leaves() {
    let base = spawn_relay(5_000).await;
    let provider = spawn_echo_provider(&base, "cache-session").await;

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("cache-session").await.unwrap();

    provider.disconnect().await;
    sleep(Duration::from_millis(200)).await;

    // No provider attached: the relay answers immediately from the cache
    let tools = caller.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
}

#[tokio::test]
async fn test_call_without_provider_is_a_session_error() {
    let base = spawn_relay(5_000).await;

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();

    // The caller's own session has no provider
    let error = caller
        .call_tool("echo", Some(object(json!({ "message": "hi" }))))
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Session);
}

#[tokio::test]
async fn test_provider_takeover_is_terminal_for_the_incumbent() {
    let base = spawn_relay(5_000).await;

    let first = PeerClient::provider(PeerConfig::new(&base).with_session_id("X"));
    let takeover_errors: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&takeover_errors);
    first.on(EventKind::Error, move |event| {
        if let ClientEvent::Error(error) = event {
            sink.lock().unwrap().push(error.json_rpc_code());
        }
    });
    first.attach().await.unwrap();

    let second = PeerClient::provider(PeerConfig::new(&base).with_session_id("X"));
    second.attach().await.unwrap();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(takeover_errors.lock().unwrap().as_slice(), [-32002]);
    assert_eq!(first.state().await, ConnectionState::Terminal);
    assert_eq!(second.state().await, ConnectionState::Connected);

    // The session stays serviceable through the new provider
    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("X").await.unwrap();
    let pong = caller.ping().await.unwrap();
    assert_eq!(pong.get("pong"), Some(&json!(true)));
}

#[tokio::test]
async fn test_concurrent_callers_keep_their_own_ids() {
    let base = spawn_relay(5_000).await;
    let _provider = spawn_echo_provider(&base, "F").await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let base = base.clone();
        handles.push(tokio::spawn(async move {
            let caller = PeerClient::caller(PeerConfig::new(&base));
            caller.attach().await.unwrap();
            caller.join_session("F").await.unwrap();
            let result = caller
                .call_tool("echo", Some(object(json!({ "message": format!("msg-{i}") }))))
                .await
                .unwrap();
            (i, result)
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, vec![Content::text(format!("msg-{i}"))]);
    }
}

#[tokio::test]
async fn test_tools_updated_reaches_every_caller() {
    let base = spawn_relay(5_000).await;

    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("U"));
    provider.attach().await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    let updates: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    caller.on(EventKind::Message, move |event| {
        if let ClientEvent::Message(value) = event {
            if value.get("method").and_then(Value::as_str) == Some("tools/updated") {
                sink.lock().unwrap().push(value.clone());
            }
        }
    });
    caller.attach().await.unwrap();
    caller.join_session("U").await.unwrap();

    provider
        .register_tools(Some(vec![echo_descriptor()]))
        .await
        .unwrap();
    sleep(Duration::from_millis(300)).await;

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    let tools = updates[0]
        .get("params")
        .and_then(|params| params.get("tools"))
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(tools.len(), 1);
}

#[tokio::test]
async fn test_provider_disconnect_notifies_callers() {
    let base = spawn_relay(5_000).await;
    let provider = spawn_echo_provider(&base, "G").await;

    let caller = PeerClient::caller(PeerConfig::new(&base));
    let notices: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&notices);
    caller.on(EventKind::Message, move |event| {
        if let ClientEvent::Message(value) = event {
            if value.get("method").and_then(Value::as_str) == Some("provider/disconnected") {
                sink.lock().unwrap().push(value.clone());
            }
        }
    });
    caller.attach().await.unwrap();
    caller.join_session("G").await.unwrap();

    provider.disconnect().await;
    sleep(Duration::from_millis(300)).await;

    let notices = notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].get("params").and_then(|p| p.get("sessionId")),
        Some(&json!("G"))
    );
}

#[tokio::test]
async fn test_health_and_session_probes() {
    let base = spawn_relay(5_000).await;
    let _provider = spawn_echo_provider(&base, "probe-session").await;

    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.get("status"), Some(&json!("ok")));
    assert_eq!(health.get("sessions"), Some(&json!(1)));
    assert_eq!(health.get("peers"), Some(&json!(1)));
    assert!(health.get("uptimeSeconds").and_then(Value::as_f64).is_some());

    let sessions: Value = http
        .get(format!("{base}/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = sessions.get("sessions").and_then(Value::as_array).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.get("id"), Some(&json!("probe-session")));
    assert_eq!(entry.get("hasProvider"), Some(&json!(true)));
    assert_eq!(entry.get("callerCount"), Some(&json!(0)));
    assert_eq!(entry.get("toolCount"), Some(&json!(1)));
    assert!(entry.get("createdAt").and_then(Value::as_str).is_some());
}

#[tokio::test]
async fn test_ingest_shape_errors_answer_400() {
    let base = spawn_relay(5_000).await;
    let http = reqwest::Client::new();

    // Missing sessionId
    let response = http
        .post(format!("{base}/message"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body.get("error").is_some());

    // Malformed body
    let response = http
        .post(format!("{base}/message?sessionId=s"))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Not a JSON-RPC 2.0 value
    let response = http
        .post(format!("{base}/message?sessionId=s"))
        .json(&json!({ "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Attach without a role
    let response = http
        .get(format!("{base}/events?sessionId=s"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
