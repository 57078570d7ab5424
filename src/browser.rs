// ABOUTME: Browser driver seam and the built-in provider toolset
// ABOUTME: Maps driver operations to named tools with schema-typed descriptors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Built-in browser toolset
//!
//! The concrete DOM automation lives outside this crate behind
//! [`BrowserDriver`]. A provider peer hands a driver to
//! [`PeerClient::register_browser_tools`] and gets the full toolset
//! installed: one named tool per driver operation, results flowing
//! through the normalizer, failures surfacing as execution errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::client::{PeerClient, ToolExecutor};
use crate::errors::{RelayError, RelayResult};
use crate::schema::ToolDescriptor;

/// Scroll directions accepted by [`BrowserDriver::scroll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Parse the wire spelling
    ///
    /// # Errors
    ///
    /// Kind `InvalidParams` for unknown directions.
    pub fn parse(raw: &str) -> RelayResult<Self> {
        match raw {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(RelayError::invalid_params(format!(
                "Invalid scroll direction: {other}"
            ))),
        }
    }
}

/// External collaborator executing browser operations for a provider
///
/// Implementations should report failures with kind `Execution`; the
/// built-in `tools/call` handler folds them into `isError` results with
/// the paired execution code.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Accessibility-style snapshot of the current page
    async fn snapshot(&self) -> RelayResult<String>;
    /// Click the element matching the selector
    async fn click(&self, selector: &str) -> RelayResult<()>;
    /// Fill a form field with a value
    async fn fill(&self, selector: &str, value: &str) -> RelayResult<()>;
    /// Type text into the focused element
    async fn type_text(&self, text: &str) -> RelayResult<()>;
    /// Hover over the element matching the selector
    async fn hover(&self, selector: &str) -> RelayResult<()>;
    /// Press a keyboard key
    async fn press(&self, key: &str) -> RelayResult<()>;
    /// Scroll the page
    async fn scroll(&self, direction: ScrollDirection, amount: Option<i64>) -> RelayResult<()>;
    /// Text content of the element matching the selector
    async fn get_text(&self, selector: &str) -> RelayResult<String>;
    /// Attribute value of the element matching the selector
    async fn get_attribute(&self, selector: &str, attribute: &str) -> RelayResult<Option<String>>;
    /// Whether the element matching the selector is visible
    async fn is_visible(&self, selector: &str) -> RelayResult<bool>;
    /// Current page URL
    async fn get_url(&self) -> RelayResult<String>;
    /// Current page title
    async fn get_title(&self) -> RelayResult<String>;
    /// Screenshot of the viewport as base64-encoded PNG
    async fn screenshot(&self) -> RelayResult<String>;
    /// Wait for the given number of milliseconds
    async fn wait(&self, ms: u64) -> RelayResult<()>;
    /// Evaluate a JavaScript expression in the page
    async fn evaluate(&self, script: &str) -> RelayResult<Value>;
}

/// Descriptors for the built-in browser toolset
#[must_use]
pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "browser_snapshot",
            "Capture an accessibility snapshot of the current page",
            empty_schema(),
        ),
        ToolDescriptor::new(
            "browser_click",
            "Click an element on the page",
            selector_schema(),
        ),
        ToolDescriptor::new(
            "browser_fill",
            "Fill a form field with a value",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" },
                    "value": { "type": "string", "description": "Value to fill in" }
                },
                "required": ["selector", "value"]
            }),
        ),
        ToolDescriptor::new(
            "browser_type",
            "Type text into the focused element",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to type" }
                },
                "required": ["text"]
            }),
        ),
        ToolDescriptor::new(
            "browser_hover",
            "Hover over an element on the page",
            selector_schema(),
        ),
        ToolDescriptor::new(
            "browser_press_key",
            "Press a keyboard key",
            json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string", "description": "Key to press, e.g. Enter" }
                },
                "required": ["key"]
            }),
        ),
        ToolDescriptor::new(
            "browser_scroll",
            "Scroll the page in a direction",
            json!({
                "type": "object",
                "properties": {
                    "direction": {
                        "type": "string",
                        "enum": ["up", "down", "left", "right"]
                    },
                    "amount": { "type": "integer", "description": "Scroll distance in pixels" }
                },
                "required": ["direction"]
            }),
        ),
        ToolDescriptor::new(
            "browser_get_text",
            "Get the text content of an element",
            selector_schema(),
        ),
        ToolDescriptor::new(
            "browser_get_attribute",
            "Get an attribute value of an element",
            json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector" },
                    "attribute": { "type": "string", "description": "Attribute name" }
                },
                "required": ["selector", "attribute"]
            }),
        ),
        ToolDescriptor::new(
            "browser_is_visible",
            "Check whether an element is visible",
            selector_schema(),
        ),
        ToolDescriptor::new(
            "browser_get_url",
            "Get the current page URL",
            empty_schema(),
        ),
        ToolDescriptor::new(
            "browser_get_title",
            "Get the current page title",
            empty_schema(),
        ),
        ToolDescriptor::new(
            "browser_screenshot",
            "Capture a screenshot of the viewport",
            empty_schema(),
        ),
        ToolDescriptor::new(
            "browser_wait",
            "Wait for a number of milliseconds",
            json!({
                "type": "object",
                "properties": {
                    "ms": { "type": "integer", "description": "Milliseconds to wait" }
                },
                "required": ["ms"]
            }),
        ),
        ToolDescriptor::new(
            "browser_evaluate",
            "Evaluate a JavaScript expression in the page",
            json!({
                "type": "object",
                "properties": {
                    "script": { "type": "string", "description": "JavaScript to evaluate" }
                },
                "required": ["script"]
            }),
        ),
    ]
}

impl PeerClient {
    /// Install the built-in browser toolset backed by the given driver
    ///
    /// Registers every descriptor from [`builtin_tools`] with an executor
    /// that adapts the matching driver operation. Call
    /// [`PeerClient::register_tools`] afterwards to publish the catalogue.
    pub async fn register_browser_tools(&self, driver: Arc<dyn BrowserDriver>) {
        for descriptor in builtin_tools() {
            let executor = browser_executor(&descriptor.name, Arc::clone(&driver));
            self.install_tool(descriptor, executor).await;
        }
    }
}

fn browser_executor(name: &str, driver: Arc<dyn BrowserDriver>) -> ToolExecutor {
    let name = name.to_owned();
    Arc::new(move |arguments: Map<String, Value>| {
        let name = name.clone();
        let driver = Arc::clone(&driver);
        Box::pin(async move { run_browser_tool(&name, &*driver, &arguments).await })
            as futures_util::future::BoxFuture<'static, RelayResult<Value>>
    })
}

async fn run_browser_tool(
    name: &str,
    driver: &dyn BrowserDriver,
    arguments: &Map<String, Value>,
) -> RelayResult<Value> {
    match name {
        "browser_snapshot" => driver.snapshot().await.map(Value::String),
        "browser_click" => {
            let selector = required_str(arguments, "selector")?;
            driver.click(&selector).await?;
            Ok(Value::String(format!("Clicked {selector}")))
        }
        "browser_fill" => {
            let selector = required_str(arguments, "selector")?;
            let value = required_str(arguments, "value")?;
            driver.fill(&selector, &value).await?;
            Ok(Value::String(format!("Filled {selector}")))
        }
        "browser_type" => {
            let text = required_str(arguments, "text")?;
            driver.type_text(&text).await?;
            Ok(Value::String("Typed text".to_owned()))
        }
        "browser_hover" => {
            let selector = required_str(arguments, "selector")?;
            driver.hover(&selector).await?;
            Ok(Value::String(format!("Hovered {selector}")))
        }
        "browser_press_key" => {
            let key = required_str(arguments, "key")?;
            driver.press(&key).await?;
            Ok(Value::String(format!("Pressed {key}")))
        }
        "browser_scroll" => {
            let direction = ScrollDirection::parse(&required_str(arguments, "direction")?)?;
            let amount = arguments.get("amount").and_then(Value::as_i64);
            driver.scroll(direction, amount).await?;
            Ok(Value::String("Scrolled".to_owned()))
        }
        "browser_get_text" => {
            let selector = required_str(arguments, "selector")?;
            driver.get_text(&selector).await.map(Value::String)
        }
        "browser_get_attribute" => {
            let selector = required_str(arguments, "selector")?;
            let attribute = required_str(arguments, "attribute")?;
            let value = driver.get_attribute(&selector, &attribute).await?;
            Ok(value.map_or(Value::Null, Value::String))
        }
        "browser_is_visible" => {
            let selector = required_str(arguments, "selector")?;
            driver.is_visible(&selector).await.map(Value::Bool)
        }
        "browser_get_url" => driver.get_url().await.map(Value::String),
        "browser_get_title" => driver.get_title().await.map(Value::String),
        "browser_screenshot" => driver.screenshot().await.map(Value::String),
        "browser_wait" => {
            let ms = arguments
                .get("ms")
                .and_then(Value::as_u64)
                .ok_or_else(|| RelayError::invalid_params("Missing ms argument"))?;
            driver.wait(ms).await?;
            Ok(Value::String(format!("Waited {ms}ms")))
        }
        "browser_evaluate" => {
            let script = required_str(arguments, "script")?;
            driver.evaluate(&script).await
        }
        other => Err(RelayError::tool_not_found(other)),
    }
}

fn required_str(arguments: &Map<String, Value>, key: &str) -> RelayResult<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| RelayError::invalid_params(format!("Missing {key} argument")))
}

fn selector_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": { "type": "string", "description": "CSS selector" }
        },
        "required": ["selector"]
    })
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}
