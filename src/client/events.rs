// ABOUTME: Observation points exposed by the peer multiplexer
// ABOUTME: Maps event kinds to callback sets iterated under a lock
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Switchboard Contributors

//! Client observations
//!
//! The multiplexer surfaces its lifecycle and traffic as immutable event
//! records delivered to subscribed callbacks in arrival order. The
//! registry is a kind-to-callbacks map iterated under a lock, so a
//! callback subscribing or unsubscribing never mutates a set mid-dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::errors::RelayError;

/// Kind discriminator for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Push channel opened and peer id learned
    Connect,
    /// Push channel closed
    Disconnect,
    /// Terminal or transport error observed
    Error,
    /// Any frame arrived on the push channel
    Message,
    /// The built-in executor is about to run a tool
    ToolCall,
}

/// Immutable observation record delivered to callbacks
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connect {
        peer_id: String,
        session_id: String,
    },
    Disconnect,
    Error(RelayError),
    Message(Value),
    ToolCall {
        name: String,
        arguments: Value,
    },
}

impl ClientEvent {
    /// The kind this record is delivered under
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Disconnect => EventKind::Disconnect,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::ToolCall { .. } => EventKind::ToolCall,
        }
    }
}

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Kind-keyed callback registry
#[derive(Default)]
pub struct EventObservers {
    callbacks: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl EventObservers {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to one event kind
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(|p| p.into_inner());
        callbacks.entry(kind).or_default().push(Arc::new(callback));
    }

    /// Deliver an event to every subscriber of its kind
    pub fn emit(&self, event: &ClientEvent) {
        let snapshot: Vec<Callback> = {
            let callbacks = self.callbacks.lock().unwrap_or_else(|p| p.into_inner());
            callbacks.get(&event.kind()).cloned().unwrap_or_default()
        };
        for callback in snapshot {
            callback(event);
        }
    }
}

impl std::fmt::Debug for EventObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventObservers").finish_non_exhaustive()
    }
}
