// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-messaging-resilience
//!
//! Provides deterministic events and pre-wired services for scenario tests.
//!
//! # Design Principles
//! - Event ids and timestamps are fixed constants
//! - Services use the in-memory transport and never sleep between retries
//! - Asynchronous delivery is awaited with [`wait_until`], never a fixed sleep

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use cim_messaging_resilience::{
    CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue, Event, InMemoryTransport,
    MessagingMetrics, ResilientEventService, RetryConfig, RetryManager,
};

pub const USER_CREATED: &str = "USER_CREATED";
pub const ORDER_PLACED: &str = "ORDER_PLACED";

// Fixed test UUIDs (UUID v7 format, but deterministic for testing)
pub const EVENT_ID_1: &str = "01934f4a-0001-7000-8000-000000000001";
pub const EVENT_ID_2: &str = "01934f4a-0002-7000-8000-000000000002";

// Fixed test timestamp (2026-01-19T12:00:00Z)
pub const FIXED_TIMESTAMP: &str = "2026-01-19T12:00:00Z";

/// Longest a scenario waits for asynchronous delivery
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Parse the fixed timestamp
pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(FIXED_TIMESTAMP)
        .expect("Invalid timestamp in test fixture")
        .with_timezone(&Utc)
}

/// A USER_CREATED event with fixed id and timestamp
pub fn user_created_fixture(id: &str) -> Event {
    Event {
        id: id.to_string(),
        event_type: USER_CREATED.to_string(),
        payload: json!({"user_id": 42, "email": "ada@example.com"}),
        timestamp: fixed_timestamp(),
    }
}

/// Retry policy of three attempts with millisecond delays
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0)
        .expect("Invalid retry config in test fixture")
}

/// Breaker config with the given failure threshold and a long reset timeout
pub fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        reset_timeout: Duration::from_secs(60),
        success_threshold: 2,
    }
}

/// Service over an in-memory transport with immediate retries
pub fn service_fixture(
    transport: Arc<InMemoryTransport>,
    breaker: CircuitBreakerConfig,
) -> ResilientEventService {
    ResilientEventService::builder()
        .transport(transport)
        .circuit_breaker(Arc::new(
            CircuitBreaker::new("broker-publish", breaker).expect("Invalid breaker config"),
        ))
        .retry_manager(RetryManager::immediate(fast_retry_config()))
        .dead_letter_queue(Arc::new(
            DeadLetterQueue::new(1000).expect("Invalid dead letter capacity"),
        ))
        .metrics(Arc::new(MessagingMetrics::new()))
        .build()
        .expect("Failed to build service fixture")
}

/// Default scenario setup: fresh transport and a service with threshold 5
pub fn setup() -> (Arc<InMemoryTransport>, ResilientEventService) {
    let transport = Arc::new(InMemoryTransport::new());
    let service = service_fixture(transport.clone(), breaker_config(5));
    (transport, service)
}

/// Poll `condition` until it holds or [`DELIVERY_TIMEOUT`] elapses
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + DELIVERY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
