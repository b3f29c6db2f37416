// Copyright (c) 2025 - Cowboy AI, Inc.
//! Typed registry of subscriber handlers
//!
//! Handlers are grouped by event type. The registry reports when a type gets
//! its first handler or loses its last one, so the service knows when to
//! subscribe or unsubscribe the transport topic.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::event::Event;

/// Handle returned by `subscribe`, used to remove a single handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Application callback for delivered events
///
/// An `Err` or a panic is captured by the service, metered and
/// dead-lettered. It never reaches the transport or other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a delivered event
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Closure-based event handler
pub struct FnEventHandler<F> {
    handler: F,
}

impl<F, Fut> FnEventHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.handler)(event).await
    }
}

struct Registration {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Handlers registered per event type, in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler, returning its id and whether it is the first for the type
    pub fn register(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> (SubscriptionId, bool) {
        let id = SubscriptionId::new();
        let mut handlers = self.handlers.write();
        let registrations = handlers.entry(event_type.to_string()).or_default();
        registrations.push(Registration { id, handler });
        (id, registrations.len() == 1)
    }

    /// Handlers for a type, cloned so dispatch runs without holding the lock
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .get(event_type)
            .map(|registrations| registrations.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove one handler
    ///
    /// Returns its event type and whether that type has no handlers left.
    pub fn remove(&self, id: SubscriptionId) -> Option<(String, bool)> {
        let mut handlers = self.handlers.write();
        let event_type = handlers
            .iter()
            .find(|(_, registrations)| registrations.iter().any(|r| r.id == id))
            .map(|(event_type, _)| event_type.clone())?;

        let registrations = handlers.get_mut(&event_type)?;
        registrations.retain(|r| r.id != id);
        let emptied = registrations.is_empty();
        if emptied {
            handlers.remove(&event_type);
        }
        Some((event_type, emptied))
    }

    /// Remove every handler for a type, returning how many were removed
    pub fn remove_type(&self, event_type: &str) -> usize {
        self.handlers
            .write()
            .remove(event_type)
            .map(|registrations| registrations.len())
            .unwrap_or(0)
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler, sorted
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().keys().cloned().collect();
        types.sort();
        types
    }
}
