// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resilient event messaging for the Composable Information Machine
//!
//! A fault-tolerant publish/subscribe layer between application services and
//! a shared message bus:
//!
//! - **Circuit breaking** isolates the bus while it is failing
//! - **Retry with backoff** recovers from transient publish failures
//! - **Dead letter queue** captures events whose handlers failed
//! - **Metrics** aggregate counters, latencies, retries and breaker transitions
//!
//! [`ResilientEventService`] composes these over a [`BrokerTransport`]
//! (NATS in production, in-memory for tests). Delivery is at-least-once;
//! consumers are expected to be idempotent.

pub mod config;
pub mod errors;
pub mod event;
pub mod metrics;
pub mod resilience;
pub mod service;
pub mod subjects;
pub mod transport;

// Re-export commonly used types
pub use config::{DeadLetterConfig, MessagingConfig, DEFAULT_RECORDED_HANDLER_ATTEMPTS};
pub use errors::{MessagingError, MessagingResult};
pub use event::Event;
pub use metrics::{AggregatedMetrics, MessagingMetrics, MetricsSnapshot};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, DeadLetterEntry, DeadLetterQueue,
    RetryConfig, RetryManager,
};
pub use service::{
    EventHandler, FnEventHandler, HealthReport, HealthStatus, Page, Pagination,
    ResilientEventService, ResilientEventServiceBuilder, SubscriptionId,
};
pub use transport::{BrokerTransport, InMemoryTransport, NatsConfig, NatsTransport};
