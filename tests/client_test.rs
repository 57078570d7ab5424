// ABOUTME: Tests for the peer multiplexer lifecycle and the browser toolset
// ABOUTME: Covers attach retries, local timeouts, disconnect semantics, and driver wiring
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchboard::browser::{builtin_tools, BrowserDriver, ScrollDirection};
use switchboard::client::{ConnectionState, PeerClient};
use switchboard::config::{PeerConfig, RelayConfig};
use switchboard::errors::{ErrorKind, RelayError, RelayResult};
use switchboard::relay::RelayServer;
use switchboard::schema::Content;
use tokio::net::TcpListener;

async fn spawn_relay() -> String {
    let config = RelayConfig {
        port: 0,
        host: "127.0.0.1".to_owned(),
        keep_alive_ms: 5_000,
        request_timeout_ms: 5_000,
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

#[tokio::test]
async fn test_attach_failure_without_reconnect_is_terminal() {
    // Nothing listens on this port
    let config = PeerConfig::new("http://127.0.0.1:1")
        .with_auto_reconnect(false)
        .with_connection_timeout_ms(1_000);
    let client = PeerClient::caller(config);

    let error = client.attach().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Connection);
    assert_eq!(client.state().await, ConnectionState::Terminal);

    // A terminal client refuses further attaches
    let error = client.attach().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Connection);
}

#[tokio::test]
async fn test_attach_retries_with_backoff_before_giving_up() {
    let mut config = PeerConfig::new("http://127.0.0.1:1").with_connection_timeout_ms(1_000);
    config.reconnect_base_delay_ms = 20;
    config.max_reconnect_attempts = 3;
    let client = PeerClient::caller(config);

    let started = Instant::now();
    client.attach().await.unwrap_err();
    let elapsed = started.elapsed();

    // Two backoff sleeps between three attempts: 20ms + 40ms
    assert!(elapsed >= Duration::from_millis(60), "gave up after {elapsed:?}");
    assert_eq!(client.state().await, ConnectionState::Terminal);
}

#[tokio::test]
async fn test_request_before_attach_fails_with_connection() {
    let client = PeerClient::caller(PeerConfig::new("http://127.0.0.1:1"));
    let error = client.request("ping", None).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Connection);
}

#[tokio::test]
async fn test_local_timeout_for_unanswered_request() {
    let base = spawn_relay().await;
    let client = PeerClient::caller(PeerConfig::new(&base).with_connection_timeout_ms(300));
    client.attach().await.unwrap();

    // The relay drops requests with unroutable methods, so nothing answers
    let started = Instant::now();
    let error = client.request("no/such/method", None).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(error.kind, ErrorKind::Timeout);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(2_000));
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_requests() {
    let base = spawn_relay().await;
    let client = PeerClient::caller(PeerConfig::new(&base).with_connection_timeout_ms(10_000));
    client.attach().await.unwrap();

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.request("no/such/method", None).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.disconnect().await;

    let error = in_flight.await.unwrap().unwrap_err();
    assert_eq!(error.kind, ErrorKind::Connection);
    assert_eq!(client.state().await, ConnectionState::Terminal);
}

struct StubDriver;

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn snapshot(&self) -> RelayResult<String> {
        Ok("- page snapshot".to_owned())
    }
    async fn click(&self, _selector: &str) -> RelayResult<()> {
        Ok(())
    }
    async fn fill(&self, _selector: &str, _value: &str) -> RelayResult<()> {
        Ok(())
    }
    async fn type_text(&self, _text: &str) -> RelayResult<()> {
        Ok(())
    }
    async fn hover(&self, _selector: &str) -> RelayResult<()> {
        Ok(())
    }
    async fn press(&self, _key: &str) -> RelayResult<()> {
        Ok(())
    }
    async fn scroll(&self, _direction: ScrollDirection, _amount: Option<i64>) -> RelayResult<()> {
        Ok(())
    }
    async fn get_text(&self, selector: &str) -> RelayResult<String> {
        Ok(format!("text of {selector}"))
    }
    async fn get_attribute(&self, _selector: &str, _attribute: &str) -> RelayResult<Option<String>> {
        Ok(None)
    }
    async fn is_visible(&self, _selector: &str) -> RelayResult<bool> {
        Ok(true)
    }
    async fn get_url(&self) -> RelayResult<String> {
        Ok("https://example.com/".to_owned())
    }
    async fn get_title(&self) -> RelayResult<String> {
        Ok("Example Domain".to_owned())
    }
    async fn screenshot(&self) -> RelayResult<String> {
        Ok("QUJD".repeat(40))
    }
    async fn wait(&self, _ms: u64) -> RelayResult<()> {
        Ok(())
    }
    async fn evaluate(&self, _script: &str) -> RelayResult<Value> {
        Err(RelayError::execution("script threw: boom"))
    }
}

#[tokio::test]
async fn test_browser_toolset_round_trip() {
    let base = spawn_relay().await;

    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("browser"));
    provider.register_browser_tools(Arc::new(StubDriver)).await;
    provider.attach().await.unwrap();
    provider.register_tools(None).await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    let tools = caller.join_session("browser").await.unwrap();
    assert_eq!(tools.len(), builtin_tools().len());

    // Text result
    let result = caller.call_tool("browser_get_title", None).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content, vec![Content::text("Example Domain")]);

    // A long base64 payload is normalized into an image item
    let result = caller.call_tool("browser_screenshot", None).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(
        result.content,
        vec![Content::image("QUJD".repeat(40), "image/png")]
    );

    // Driver failure folds into an isError result with the execution code
    let response = caller
        .request(
            "tools/call",
            Some(json!({ "name": "browser_evaluate", "arguments": { "script": "boom()" } })),
        )
        .await
        .unwrap();
    let result: Value = response.result.unwrap();
    assert_eq!(result.get("isError"), Some(&json!(true)));
    assert_eq!(response.error.unwrap().code, -32003);

    // Missing required argument is an invalid-params failure
    let response = caller
        .request(
            "tools/call",
            Some(json!({ "name": "browser_click", "arguments": {} })),
        )
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_handler_without_descriptor_is_not_a_tool() {
    let base = spawn_relay().await;

    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("H"));
    provider
        .register_handler(
            "status/report",
            |_params: Value| async move { Ok(json!({ "healthy": true })) },
            None,
        )
        .await;
    provider.attach().await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("H").await.unwrap();

    // Without a descriptor the handler stays out of the executor table
    let response = caller
        .request("tools/call", Some(json!({ "name": "status/report" })))
        .await;
    assert_eq!(response.unwrap().error.unwrap().code, -32004);
}

#[tokio::test]
async fn test_handler_with_descriptor_is_callable_as_a_tool() {
    let base = spawn_relay().await;

    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("HD"));
    provider
        .register_handler(
            "status",
            |_params: Value| async move { Ok(json!("all good")) },
            Some(switchboard::schema::ToolDescriptor::new(
                "status",
                "Report status",
                json!({ "type": "object", "properties": {} }),
            )),
        )
        .await;
    provider.attach().await.unwrap();
    provider.register_tools(None).await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    let tools = caller.join_session("HD").await.unwrap();
    assert_eq!(tools.len(), 1);

    let result = caller.call_tool("status", None).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content, vec![Content::text("all good")]);
}

#[tokio::test]
async fn test_unknown_argument_shapes_are_tolerated() {
    // register_tool executors receive an empty map when arguments are absent
    let base = spawn_relay().await;
    let provider = PeerClient::provider(PeerConfig::new(&base).with_session_id("A"));
    provider
        .register_tool(
            switchboard::schema::ToolDescriptor::new(
                "count_args",
                "Count the provided arguments",
                json!({ "type": "object", "properties": {} }),
            ),
            |args: Map<String, Value>| async move { Ok(json!(args.len())) },
        )
        .await;
    provider.attach().await.unwrap();
    provider.register_tools(None).await.unwrap();

    let caller = PeerClient::caller(PeerConfig::new(&base));
    caller.attach().await.unwrap();
    caller.join_session("A").await.unwrap();

    let result = caller.call_tool("count_args", None).await.unwrap();
    assert_eq!(result.content, vec![Content::text("0")]);
}
