// Copyright (c) 2025 - Cowboy AI, Inc.
//! Broker Transport
//!
//! Thin seam between the resilient event service and the message bus. A
//! transport moves opaque byte payloads between named topics; it knows
//! nothing about events, retries or dead letters.
//!
//! # Implementations
//!
//! - [`NatsTransport`]: core NATS publish/subscribe via `async-nats`
//! - [`InMemoryTransport`]: in-process bus for local runs and tests
//!
//! # Delivery
//!
//! Callbacks are invoked on spawned tasks, never inline on the transport's
//! receive loop, so a slow handler cannot stall delivery for other topics.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::errors::MessagingResult;

pub mod memory;
pub mod nats;

pub use memory::InMemoryTransport;
pub use nats::{NatsConfig, NatsTransport};

/// Callback invoked with every raw payload delivered on a topic
pub type MessageCallback = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Publish/subscribe transport over a shared message bus
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Publish a serialized message to a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> MessagingResult<()>;

    /// Deliver every message published on `topic` to `callback`
    ///
    /// Subscribing a topic that already has a callback replaces it.
    async fn subscribe(&self, topic: &str, callback: MessageCallback) -> MessagingResult<()>;

    /// Stop delivering messages for `topic`
    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()>;

    /// Report whether the broker is reachable
    async fn ping(&self) -> bool;

    /// Release the broker connection
    ///
    /// Calling this more than once is a no-op.
    async fn disconnect(&self) -> MessagingResult<()>;
}
