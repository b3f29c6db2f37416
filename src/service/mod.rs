// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resilient Event Service
//!
//! Application-facing publish/subscribe API composed from the broker
//! transport and the resilience primitives.
//!
//! # Publish path
//!
//! ```text
//! publish(type, data)
//!   └─ CircuitBreaker::execute
//!        └─ RetryManager::execute (backoff on transport errors)
//!             └─ BrokerTransport::publish("{prefix}.{type}", json)
//! ```
//!
//! Publish errors are returned to the caller and never dead-lettered.
//!
//! # Subscribe path
//!
//! Each delivery is decoded and handed to every handler registered for the
//! type, concurrently. A handler error or panic is logged, metered and
//! dead-lettered; it never reaches the transport or the other handlers.
//!
//! # Example
//!
//! ```rust,no_run
//! use cim_messaging_resilience::{MessagingConfig, ResilientEventService};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ResilientEventService::connect(MessagingConfig::from_env()?).await?;
//!
//! service
//!     .subscribe_fn("USER_CREATED", |event| async move {
//!         println!("user created: {}", event.payload);
//!         anyhow::Ok(())
//!     })
//!     .await?;
//!
//! service.publish("USER_CREATED", json!({"id": 42})).await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod registry;

use bytes::Bytes;
use futures::future::{join_all, FutureExt};
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{MessagingConfig, DEFAULT_RECORDED_HANDLER_ATTEMPTS};
use crate::errors::{MessagingError, MessagingResult};
use crate::event::Event;
use crate::metrics::{AggregatedMetrics, MessagingMetrics, MetricsSnapshot};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerStats, CircuitState, DeadLetterQueue, RetryManager,
};
use crate::subjects::{
    validate_event_type, validate_subject_prefix, SubjectBuilder, DEFAULT_SUBJECT_PREFIX,
};
use crate::transport::{BrokerTransport, MessageCallback, NatsTransport};

pub use admin::{Page, Pagination, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use registry::{EventHandler, FnEventHandler, HandlerRegistry, SubscriptionId};

/// Name of the breaker guarding broker publishes
pub const PUBLISH_BREAKER_NAME: &str = "broker-publish";

/// Overall health derived from the individual probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Broker reachable and circuit closed
    Healthy,
    /// Broker reachable but the circuit is open or probing
    Degraded,
    /// Broker unreachable
    Unhealthy,
}

/// Result of [`ResilientEventService::check_health`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub transport_reachable: bool,
    pub circuit_breaker_state: CircuitState,
    pub dead_letter_queue_size: usize,
    pub status: HealthStatus,
}

impl HealthReport {
    fn new(
        transport_reachable: bool,
        circuit_breaker_state: CircuitState,
        dead_letter_queue_size: usize,
    ) -> Self {
        let status = match (transport_reachable, circuit_breaker_state) {
            (false, _) => HealthStatus::Unhealthy,
            (true, CircuitState::Closed) => HealthStatus::Healthy,
            (true, _) => HealthStatus::Degraded,
        };
        Self {
            transport_reachable,
            circuit_breaker_state,
            dead_letter_queue_size,
            status,
        }
    }
}

/// Fault-tolerant publish/subscribe over a broker transport
#[derive(Clone)]
pub struct ResilientEventService {
    transport: Arc<dyn BrokerTransport>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryManager,
    dead_letter_queue: Arc<DeadLetterQueue>,
    metrics: Arc<MessagingMetrics>,
    registry: Arc<HandlerRegistry>,
    subscription_changes: Arc<AsyncMutex<()>>,
    subject_prefix: String,
    recorded_handler_attempts: u32,
}

impl ResilientEventService {
    /// Start building a service from explicit collaborators
    pub fn builder() -> ResilientEventServiceBuilder {
        ResilientEventServiceBuilder::new()
    }

    /// Wire a service over `transport` using the given configuration
    pub fn from_config(
        config: &MessagingConfig,
        transport: Arc<dyn BrokerTransport>,
    ) -> MessagingResult<Self> {
        config.validate()?;
        Self::builder()
            .transport(transport)
            .circuit_breaker(Arc::new(CircuitBreaker::new(
                PUBLISH_BREAKER_NAME,
                config.circuit_breaker.clone(),
            )?))
            .retry_manager(RetryManager::new(config.retry.clone()))
            .dead_letter_queue(Arc::new(DeadLetterQueue::new(config.dead_letter.capacity)?))
            .metrics(Arc::new(MessagingMetrics::new()))
            .subject_prefix(config.subject_prefix.clone())
            .recorded_handler_attempts(config.dead_letter.recorded_handler_attempts)
            .build()
    }

    /// Connect to NATS and wire a service over the connection
    pub async fn connect(config: MessagingConfig) -> MessagingResult<Self> {
        config.validate()?;
        let transport = NatsTransport::connect(config.nats.clone()).await?;
        Self::from_config(&config, Arc::new(transport))
    }

    /// Publish `data` as a new event of `event_type`
    pub async fn publish(&self, event_type: &str, data: serde_json::Value) -> MessagingResult<()> {
        validate_event_type(event_type)?;
        self.publish_event(&Event::new(event_type, data)).await
    }

    /// Publish an already built event through the breaker and retry loop
    pub(crate) async fn publish_event(&self, event: &Event) -> MessagingResult<()> {
        let event_type = event.event_type.as_str();
        let topic = self.subject_for(event_type)?;
        let payload = Bytes::from(event.to_bytes()?);
        let start = Instant::now();

        let result = self
            .circuit_breaker
            .execute(|| {
                self.retry.execute_observed(
                    || self.transport.publish(&topic, payload.clone()),
                    |attempt| {
                        warn!(
                            event_type = %event_type,
                            attempt = attempt.attempt,
                            delay_ms = attempt.delay.as_millis() as u64,
                            error = %attempt.error,
                            "publish failed, retrying"
                        );
                        self.metrics.record_retry(
                            event_type,
                            attempt.attempt,
                            attempt.delay,
                            &attempt.error.to_string(),
                        );
                    },
                )
            })
            .await;

        match result {
            Ok(()) => {
                self.metrics.record_published(event_type, start.elapsed());
                debug!(event_id = %event.id, topic = %topic, "event published");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failed(event_type);
                error!(event_id = %event.id, topic = %topic, error = %e, "publish failed");
                Err(e)
            }
        }
    }

    /// Register a handler for `event_type`
    ///
    /// The first handler for a type subscribes the transport topic; later
    /// handlers share that subscription. Registry changes and the matching
    /// transport call happen under one lock, so a concurrent registration
    /// never observes a type whose topic subscription is still pending.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> MessagingResult<SubscriptionId> {
        validate_event_type(event_type)?;
        let topic = self.subject_for(event_type)?;

        let _changes = self.subscription_changes.lock().await;
        let (id, first) = self.registry.register(event_type, handler);
        if first {
            let dispatcher = Arc::new(Dispatcher {
                event_type: event_type.to_string(),
                registry: self.registry.clone(),
                metrics: self.metrics.clone(),
                dead_letter_queue: self.dead_letter_queue.clone(),
                recorded_handler_attempts: self.recorded_handler_attempts,
            });
            let callback: MessageCallback =
                Arc::new(move |payload: Bytes| dispatcher.clone().dispatch(payload).boxed());

            if let Err(e) = self.transport.subscribe(&topic, callback).await {
                self.registry.remove(id);
                return Err(e);
            }
            info!(event_type = %event_type, topic = %topic, "subscribed to event type");
        }

        debug!(event_type = %event_type, subscription = %id, "handler registered");
        Ok(id)
    }

    /// Register a closure as a handler for `event_type`
    pub async fn subscribe_fn<F, Fut>(&self, event_type: &str, handler: F) -> MessagingResult<SubscriptionId>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(event_type, Arc::new(FnEventHandler::new(handler)))
            .await
    }

    /// Drop every handler for `event_type` and its transport subscription
    ///
    /// Returns how many handlers were removed.
    pub async fn unsubscribe(&self, event_type: &str) -> MessagingResult<usize> {
        let _changes = self.subscription_changes.lock().await;
        let removed = self.registry.remove_type(event_type);
        if removed > 0 {
            self.transport.unsubscribe(&self.subject_for(event_type)?).await?;
            info!(event_type = %event_type, handlers = removed, "unsubscribed from event type");
        }
        Ok(removed)
    }

    /// Drop a single handler
    ///
    /// Removing the last handler of a type also unsubscribes its topic.
    pub async fn remove_handler(&self, id: SubscriptionId) -> MessagingResult<bool> {
        let _changes = self.subscription_changes.lock().await;
        let Some((event_type, emptied)) = self.registry.remove(id) else {
            return Ok(false);
        };
        if emptied {
            self.transport.unsubscribe(&self.subject_for(&event_type)?).await?;
            info!(event_type = %event_type, "last handler removed, unsubscribed");
        }
        Ok(true)
    }

    /// Probe the transport, breaker and dead letter queue concurrently
    pub async fn check_health(&self) -> HealthReport {
        let (transport_reachable, circuit_breaker_state, dead_letter_queue_size) = tokio::join!(
            self.transport.ping(),
            async { self.circuit_breaker.state() },
            async { self.dead_letter_queue.size() },
        );
        HealthReport::new(transport_reachable, circuit_breaker_state, dead_letter_queue_size)
    }

    /// Aggregated operational metrics
    pub fn get_metrics(&self) -> AggregatedMetrics {
        self.metrics.aggregated()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &MessagingMetrics {
        &self.metrics
    }

    pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
        self.circuit_breaker.stats()
    }

    pub fn dead_letter_queue(&self) -> &DeadLetterQueue {
        &self.dead_letter_queue
    }

    /// Event types with at least one registered handler
    pub fn subscribed_event_types(&self) -> Vec<String> {
        self.registry.event_types()
    }

    /// Release the broker connection; calling it again is a no-op
    pub async fn disconnect(&self) -> MessagingResult<()> {
        self.transport.disconnect().await?;
        info!("event service disconnected");
        Ok(())
    }

    fn subject_for(&self, event_type: &str) -> MessagingResult<String> {
        SubjectBuilder::new()
            .prefix(self.subject_prefix.clone())
            .event_type(event_type)
            .build()
    }
}

/// Fans one topic's deliveries out to its registered handlers
struct Dispatcher {
    event_type: String,
    registry: Arc<HandlerRegistry>,
    metrics: Arc<MessagingMetrics>,
    dead_letter_queue: Arc<DeadLetterQueue>,
    recorded_handler_attempts: u32,
}

impl Dispatcher {
    async fn dispatch(self: Arc<Self>, payload: Bytes) {
        let event = match Event::from_bytes(&payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    event_type = %self.event_type,
                    payload_size = payload.len(),
                    error = %e,
                    "dropping undecodable delivery"
                );
                return;
            }
        };

        let handlers = self.registry.handlers_for(&self.event_type);
        debug!(
            event_id = %event.id,
            event_type = %self.event_type,
            handlers = handlers.len(),
            "dispatching event"
        );

        let failures = join_all(
            handlers
                .into_iter()
                .map(|handler| self.run_handler(handler, event.clone())),
        )
        .await;

        // One dead letter per delivery; the entry keeps the last failure
        if let Some(failure) = failures.into_iter().flatten().last() {
            self.metrics.record_dead_lettered(&self.event_type);
            self.dead_letter_queue.add_message(
                event.id.clone(),
                event,
                failure.to_string(),
                self.recorded_handler_attempts,
                self.event_type.clone(),
            );
        }
    }

    /// Run one handler, returning its failure if it errored or panicked
    async fn run_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        event: Event,
    ) -> Option<MessagingError> {
        let start = Instant::now();
        let outcome = AssertUnwindSafe(handler.handle(event.clone()))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                self.metrics
                    .record_processing_time(&self.event_type, start.elapsed());
                return None;
            }
            Ok(Err(e)) => MessagingError::Handler {
                event_type: self.event_type.clone(),
                message: format!("{:#}", e),
            },
            Err(panic) => MessagingError::Handler {
                event_type: self.event_type.clone(),
                message: panic_message(panic.as_ref()),
            },
        };

        error!(
            event_id = %event.id,
            event_type = %self.event_type,
            error = %failure,
            "handler failed, dead-lettering event"
        );
        self.metrics.record_failed(&self.event_type);
        Some(failure)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned());
    match detail {
        Some(detail) => format!("handler panicked: {}", detail),
        None => "handler panicked".to_string(),
    }
}

/// Builder for [`ResilientEventService`]
///
/// Every collaborator must be supplied; `build` fails with a validation
/// error naming the first one that is missing.
pub struct ResilientEventServiceBuilder {
    transport: Option<Arc<dyn BrokerTransport>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryManager>,
    dead_letter_queue: Option<Arc<DeadLetterQueue>>,
    metrics: Option<Arc<MessagingMetrics>>,
    subject_prefix: String,
    recorded_handler_attempts: u32,
}

impl ResilientEventServiceBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            circuit_breaker: None,
            retry: None,
            dead_letter_queue: None,
            metrics: None,
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            recorded_handler_attempts: DEFAULT_RECORDED_HANDLER_ATTEMPTS,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn BrokerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn retry_manager(mut self, retry: RetryManager) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn dead_letter_queue(mut self, dead_letter_queue: Arc<DeadLetterQueue>) -> Self {
        self.dead_letter_queue = Some(dead_letter_queue);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MessagingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subject prefix, `events` by default
    pub fn subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// Retry count stored on dead letters from failing handlers
    pub fn recorded_handler_attempts(mut self, attempts: u32) -> Self {
        self.recorded_handler_attempts = attempts;
        self
    }

    /// Build the service and wire breaker transitions into the metrics
    pub fn build(self) -> MessagingResult<ResilientEventService> {
        let transport = self
            .transport
            .ok_or_else(|| MessagingError::Validation("transport not set".to_string()))?;
        let circuit_breaker = self
            .circuit_breaker
            .ok_or_else(|| MessagingError::Validation("circuit breaker not set".to_string()))?;
        let retry = self
            .retry
            .ok_or_else(|| MessagingError::Validation("retry manager not set".to_string()))?;
        let dead_letter_queue = self
            .dead_letter_queue
            .ok_or_else(|| MessagingError::Validation("dead letter queue not set".to_string()))?;
        let metrics = self
            .metrics
            .ok_or_else(|| MessagingError::Validation("metrics not set".to_string()))?;

        validate_subject_prefix(&self.subject_prefix)?;

        let sink = metrics.clone();
        circuit_breaker.on_state_change(move |transition| sink.record_circuit_transition(transition));

        Ok(ResilientEventService {
            transport,
            circuit_breaker,
            retry,
            dead_letter_queue,
            metrics,
            registry: Arc::new(HandlerRegistry::new()),
            subscription_changes: Arc::new(AsyncMutex::new(())),
            subject_prefix: self.subject_prefix,
            recorded_handler_attempts: self.recorded_handler_attempts,
        })
    }
}

impl Default for ResilientEventServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
