// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process broker transport
//!
//! Delivers published payloads to the callback subscribed on the same topic,
//! each delivery on its own tokio task. Useful for local runs and tests: it
//! can simulate broker failures and records every publish attempt.
//!
//! Subscribe and unsubscribe yield to the scheduler before touching the
//! topic table, like a broker round trip would.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tracing::debug;

use super::{BrokerTransport, MessageCallback};
use crate::errors::{MessagingError, MessagingResult};

/// In-memory publish/subscribe transport
#[derive(Default)]
pub struct InMemoryTransport {
    callbacks: RwLock<HashMap<String, MessageCallback>>,
    published: RwLock<Vec<(String, Bytes)>>,
    publish_attempts: AtomicU64,
    failures_remaining: AtomicU32,
    subscribe_failures_remaining: AtomicU32,
    unreachable: AtomicBool,
    disconnected: AtomicBool,
}

impl InMemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publish calls fail with a transport error
    pub fn fail_next_publishes(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` subscribe calls fail with a transport error
    pub fn fail_next_subscribes(&self, count: u32) {
        self.subscribe_failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Simulate the broker becoming (un)reachable
    ///
    /// While unreachable, every publish fails and ping reports false.
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Successfully published messages, oldest first
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.read().clone()
    }

    /// Number of publish calls, successful or not
    pub fn publish_attempts(&self) -> u64 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    /// Whether a callback is subscribed on `topic`
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.callbacks.read().contains_key(topic)
    }

    /// Whether `disconnect` has been called
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> MessagingResult<()> {
        if self.is_disconnected() {
            return Err(MessagingError::Transport("transport is disconnected".to_string()));
        }
        Ok(())
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> MessagingResult<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MessagingError::Transport("broker unreachable".to_string()));
        }
        if Self::take_injected_failure(&self.failures_remaining) {
            return Err(MessagingError::Transport("injected publish failure".to_string()));
        }

        self.published.write().push((topic.to_string(), payload.clone()));

        let callback = self.callbacks.read().get(topic).cloned();
        if let Some(callback) = callback {
            debug!(topic = %topic, payload_size = payload.len(), "Delivering message");
            tokio::spawn(callback(payload));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: MessageCallback) -> MessagingResult<()> {
        tokio::task::yield_now().await;
        self.ensure_connected()?;
        if Self::take_injected_failure(&self.subscribe_failures_remaining) {
            return Err(MessagingError::Transport("injected subscribe failure".to_string()));
        }
        self.callbacks.write().insert(topic.to_string(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        tokio::task::yield_now().await;
        self.callbacks.write().remove(topic);
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.is_disconnected() && !self.unreachable.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.callbacks.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn channel_callback() -> (MessageCallback, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: MessageCallback = Arc::new(move |payload: Bytes| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload);
            }
            .boxed()
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn test_publish_delivers_to_subscriber() {
        let transport = InMemoryTransport::new();
        let (callback, mut rx) = channel_callback();

        transport.subscribe("events.A", callback).await.unwrap();
        transport.publish("events.A", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let transport = InMemoryTransport::new();
        transport.fail_next_publishes(2);

        assert!(transport.publish("t", Bytes::new()).await.is_err());
        assert!(transport.publish("t", Bytes::new()).await.is_err());
        assert!(transport.publish("t", Bytes::new()).await.is_ok());
        assert_eq!(transport.publish_attempts(), 3);
    }

    #[tokio::test]
    async fn test_injected_subscribe_failure() {
        let transport = InMemoryTransport::new();
        transport.fail_next_subscribes(1);

        let (callback, _rx) = channel_callback();
        assert!(transport.subscribe("t", callback.clone()).await.is_err());
        assert!(!transport.is_subscribed("t"));
        assert!(transport.subscribe("t", callback).await.is_ok());
        assert!(transport.is_subscribed("t"));
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let transport = InMemoryTransport::new();
        transport.set_reachable(false);

        assert!(!transport.ping().await);
        assert!(matches!(
            transport.publish("t", Bytes::new()).await,
            Err(MessagingError::Transport(_))
        ));

        transport.set_reachable(true);
        assert!(transport.ping().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = InMemoryTransport::new();
        let (callback, _rx) = channel_callback();
        transport.subscribe("t", callback).await.unwrap();

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(transport.is_disconnected());
        assert!(!transport.is_subscribed("t"));
        assert!(!transport.ping().await);
        assert!(transport.publish("t", Bytes::new()).await.is_err());
    }
}
