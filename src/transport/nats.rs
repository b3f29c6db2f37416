// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS-backed broker transport

use async_nats::{Client, ConnectOptions, Subscriber};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrokerTransport, MessageCallback};
use crate::errors::{MessagingError, MessagingResult};

/// Configuration for NATS connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// How long a liveness ping may wait for the server to acknowledge
    pub ping_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "cim-messaging".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(2),
        }
    }
}

impl NatsConfig {
    /// Point the configuration at a single broker host and port
    pub fn with_broker(mut self, host: &str, port: u16) -> Self {
        self.servers = vec![format!("nats://{}:{}", host, port)];
        self
    }
}

/// Broker transport over core NATS publish/subscribe
///
/// One receive task runs per subscribed subject. Each delivered message is
/// handed to the callback on its own task.
pub struct NatsTransport {
    client: RwLock<Option<Client>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    ping_timeout: Duration,
}

impl NatsTransport {
    /// Connect to NATS with the given configuration
    pub async fn connect(config: NatsConfig) -> MessagingResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        info!(servers = ?config.servers, "Connected to NATS");

        Ok(Self::from_client(client, config.ping_timeout))
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client, ping_timeout: Duration) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            subscriptions: Mutex::new(HashMap::new()),
            ping_timeout,
        }
    }

    fn client(&self) -> MessagingResult<Client> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| MessagingError::Transport("transport is disconnected".to_string()))
    }

    /// Number of subjects with an active receive task
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

/// Forward every message on the subscription to the callback
async fn process_messages(subject: String, mut subscriber: Subscriber, callback: MessageCallback) {
    while let Some(message) = subscriber.next().await {
        debug!(
            subject = %message.subject,
            payload_size = message.payload.len(),
            "Received message"
        );
        tokio::spawn(callback(message.payload));
    }

    warn!(subject = %subject, "Subscription ended");
}

#[async_trait]
impl BrokerTransport for NatsTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> MessagingResult<()> {
        let client = self.client()?;

        client
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        debug!(subject = %topic, "Published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: MessageCallback) -> MessagingResult<()> {
        let client = self.client()?;

        let subscriber = client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        let handle = tokio::spawn(process_messages(topic.to_string(), subscriber, callback));

        if let Some(previous) = self.subscriptions.lock().insert(topic.to_string(), handle) {
            previous.abort();
        }

        info!(subject = %topic, "Subscribed to subject");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        // Dropping the subscriber inside the aborted task unsubscribes on the server
        if let Some(handle) = self.subscriptions.lock().remove(topic) {
            handle.abort();
            info!(subject = %topic, "Unsubscribed from subject");
        }
        Ok(())
    }

    async fn ping(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };

        matches!(
            tokio::time::timeout(self.ping_timeout, client.flush()).await,
            Ok(Ok(()))
        )
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        let Some(client) = self.client.write().take() else {
            return Ok(());
        };

        for (subject, handle) in self.subscriptions.lock().drain() {
            debug!(subject = %subject, "Stopping subscription");
            handle.abort();
        }

        if let Err(e) = client.flush().await {
            warn!(error = %e, "Failed to flush NATS connection during disconnect");
        }

        info!("Disconnected from NATS");
        Ok(())
    }
}
