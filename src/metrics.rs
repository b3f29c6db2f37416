// Copyright (c) 2025 - Cowboy AI, Inc.
//! Messaging Metrics
//!
//! In-memory counters and timers for the resilient event service. Nothing
//! is persisted; a restart starts from zero.
//!
//! # What is recorded
//!
//! - Per event type (created lazily on first use): `published`, `failed`,
//!   `retried`, `dead_lettered` counters and processing-time samples in
//!   milliseconds
//! - Globally: timestamped circuit breaker transitions and retry attempts
//!
//! The global lists grow until [`MessagingMetrics::clear_old_metrics`] prunes
//! them by age; the same call trims each type's samples to the most recent
//! [`MAX_PROCESSING_SAMPLES`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use crate::resilience::circuit_breaker::{CircuitState, CircuitTransition};

/// Samples kept per event type after pruning
pub const MAX_PROCESSING_SAMPLES: usize = 1000;

/// Counters and samples for one event type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventTypeMetrics {
    pub published: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    /// Processing times in milliseconds, oldest first
    pub processing_time_samples: Vec<f64>,
}

impl EventTypeMetrics {
    /// Arithmetic mean of the samples, if any
    pub fn average_processing_time_ms(&self) -> Option<f64> {
        if self.processing_time_samples.is_empty() {
            return None;
        }
        let sum: f64 = self.processing_time_samples.iter().sum();
        Some(sum / self.processing_time_samples.len() as f64)
    }

    fn counters(&self) -> EventTypeCounters {
        EventTypeCounters {
            published: self.published,
            failed: self.failed,
            retried: self.retried,
            dead_lettered: self.dead_lettered,
        }
    }
}

/// A recorded circuit breaker state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitTransitionRecord {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
}

/// A recorded retry of a failed publish attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttemptRecord {
    pub event_type: String,
    /// The attempt that failed (1-based)
    pub attempt: u32,
    pub delay_ms: u64,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Raw view of everything recorded
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub event_types: BTreeMap<String, EventTypeMetrics>,
    pub circuit_transitions: Vec<CircuitTransitionRecord>,
    pub retry_attempts: Vec<RetryAttemptRecord>,
}

/// Counters for one event type in an aggregated report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventTypeCounters {
    pub published: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// Totals across all event types
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_published: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_dead_lettered: u64,
    pub circuit_breaker_transitions: usize,
    pub retry_attempts: usize,
    /// Mean processing time per event type; types without samples are absent
    pub average_processing_time_ms: BTreeMap<String, f64>,
    pub event_types: BTreeMap<String, EventTypeCounters>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Default)]
struct MetricsState {
    event_types: HashMap<String, EventTypeMetrics>,
    circuit_transitions: Vec<CircuitTransitionRecord>,
    retry_attempts: Vec<RetryAttemptRecord>,
}

impl MetricsState {
    fn event_type(&mut self, event_type: &str) -> &mut EventTypeMetrics {
        self.event_types.entry(event_type.to_string()).or_default()
    }
}

/// Thread-safe metrics aggregator
#[derive(Default)]
pub struct MessagingMetrics {
    state: Mutex<MetricsState>,
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

impl MessagingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful publish and its latency
    pub fn record_published(&self, event_type: &str, processing_time: Duration) {
        let mut state = self.state.lock();
        let metrics = state.event_type(event_type);
        metrics.published += 1;
        metrics.processing_time_samples.push(as_millis_f64(processing_time));
    }

    /// Add a processing-time sample without touching counters
    pub fn record_processing_time(&self, event_type: &str, processing_time: Duration) {
        self.state
            .lock()
            .event_type(event_type)
            .processing_time_samples
            .push(as_millis_f64(processing_time));
    }

    pub fn record_failed(&self, event_type: &str) {
        self.state.lock().event_type(event_type).failed += 1;
    }

    /// Count one delivery moved to the dead letter queue
    ///
    /// Called once per delivery however many of its handlers failed.
    pub fn record_dead_lettered(&self, event_type: &str) {
        self.state.lock().event_type(event_type).dead_lettered += 1;
    }

    /// Count a retry and keep a timestamped record of it
    pub fn record_retry(&self, event_type: &str, attempt: u32, delay: Duration, error: &str) {
        let mut state = self.state.lock();
        state.event_type(event_type).retried += 1;
        state.retry_attempts.push(RetryAttemptRecord {
            event_type: event_type.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn record_circuit_transition(&self, transition: &CircuitTransition) {
        self.state.lock().circuit_transitions.push(CircuitTransitionRecord {
            breaker: transition.breaker.clone(),
            from: transition.from,
            to: transition.to,
            timestamp: transition.at,
        });
    }

    pub fn event_type_metrics(&self, event_type: &str) -> Option<EventTypeMetrics> {
        self.state.lock().event_types.get(event_type).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            event_types: state
                .event_types
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            circuit_transitions: state.circuit_transitions.clone(),
            retry_attempts: state.retry_attempts.clone(),
        }
    }

    pub fn aggregated(&self) -> AggregatedMetrics {
        let state = self.state.lock();
        let mut report = AggregatedMetrics {
            total_published: 0,
            total_failed: 0,
            total_retried: 0,
            total_dead_lettered: 0,
            circuit_breaker_transitions: state.circuit_transitions.len(),
            retry_attempts: state.retry_attempts.len(),
            average_processing_time_ms: BTreeMap::new(),
            event_types: BTreeMap::new(),
            collected_at: Utc::now(),
        };

        for (event_type, metrics) in &state.event_types {
            report.total_published += metrics.published;
            report.total_failed += metrics.failed;
            report.total_retried += metrics.retried;
            report.total_dead_lettered += metrics.dead_lettered;
            report.event_types.insert(event_type.clone(), metrics.counters());
            if let Some(avg) = metrics.average_processing_time_ms() {
                report.average_processing_time_ms.insert(event_type.clone(), avg);
            }
        }

        report
    }

    /// Drop records older than `older_than` and trim processing samples
    pub fn clear_old_metrics(&self, older_than: Duration) {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let mut state = self.state.lock();
        if let Some(cutoff) = cutoff {
            state.circuit_transitions.retain(|t| t.timestamp >= cutoff);
            state.retry_attempts.retain(|r| r.timestamp >= cutoff);
        }

        for metrics in state.event_types.values_mut() {
            let samples = &mut metrics.processing_time_samples;
            if samples.len() > MAX_PROCESSING_SAMPLES {
                samples.drain(..samples.len() - MAX_PROCESSING_SAMPLES);
            }
        }

        debug!(
            transitions = state.circuit_transitions.len(),
            retries = state.retry_attempts.len(),
            "pruned old metrics"
        );
    }

    /// Forget everything recorded so far
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn transition(from: CircuitState, to: CircuitState) -> CircuitTransition {
        CircuitTransition {
            breaker: "broker-publish".into(),
            from,
            to,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_counters_are_per_event_type() {
        let metrics = MessagingMetrics::new();
        for _ in 0..5 {
            metrics.record_published("X", Duration::from_millis(10));
        }
        metrics.record_failed("X");
        metrics.record_failed("X");
        metrics.record_published("Y", Duration::from_millis(10));

        let report = metrics.aggregated();
        assert_eq!(report.event_types["X"].published, 5);
        assert_eq!(report.event_types["X"].failed, 2);
        assert_eq!(report.total_published, 6);
        assert_eq!(report.total_failed, 2);
    }

    #[test]
    fn test_unknown_type_has_no_metrics() {
        let metrics = MessagingMetrics::new();
        assert!(metrics.event_type_metrics("nope").is_none());
        metrics.record_dead_lettered("nope");
        assert_eq!(metrics.event_type_metrics("nope").unwrap().dead_lettered, 1);
    }

    #[test]
    fn test_average_processing_time_omits_types_without_samples() {
        let metrics = MessagingMetrics::new();
        metrics.record_processing_time("A", Duration::from_millis(10));
        metrics.record_processing_time("A", Duration::from_millis(30));
        metrics.record_failed("B");

        let report = metrics.aggregated();
        assert_eq!(report.average_processing_time_ms.get("A"), Some(&20.0));
        assert!(!report.average_processing_time_ms.contains_key("B"));
        assert!(report.event_types.contains_key("B"));
    }

    #[test]
    fn test_retries_and_transitions_are_counted() {
        let metrics = MessagingMetrics::new();
        metrics.record_retry("A", 1, Duration::from_millis(100), "timeout");
        metrics.record_retry("A", 2, Duration::from_millis(200), "timeout");
        metrics.record_circuit_transition(&transition(CircuitState::Closed, CircuitState::Open));

        let report = metrics.aggregated();
        assert_eq!(report.total_retried, 2);
        assert_eq!(report.retry_attempts, 2);
        assert_eq!(report.circuit_breaker_transitions, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.retry_attempts[1].attempt, 2);
        assert_eq!(snapshot.retry_attempts[1].delay_ms, 200);
        assert_eq!(snapshot.circuit_transitions[0].to, CircuitState::Open);
    }

    #[test]
    fn test_clear_old_metrics_prunes_by_age() {
        let metrics = MessagingMetrics::new();
        let mut old = transition(CircuitState::Closed, CircuitState::Open);
        old.at = Utc::now() - chrono::Duration::hours(2);
        metrics.record_circuit_transition(&old);
        metrics.record_circuit_transition(&transition(CircuitState::Open, CircuitState::HalfOpen));
        metrics.record_retry("A", 1, Duration::ZERO, "err");

        metrics.clear_old_metrics(Duration::from_secs(3600));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.circuit_transitions.len(), 1);
        assert_eq!(snapshot.circuit_transitions[0].to, CircuitState::HalfOpen);
        assert_eq!(snapshot.retry_attempts.len(), 1);
    }

    #[test]
    fn test_clear_old_metrics_caps_samples() {
        let metrics = MessagingMetrics::new();
        for i in 0..(MAX_PROCESSING_SAMPLES + 5) {
            metrics.record_processing_time("A", Duration::from_millis(i as u64));
        }

        metrics.clear_old_metrics(Duration::from_secs(3600));

        let samples = metrics.event_type_metrics("A").unwrap().processing_time_samples;
        assert_eq!(samples.len(), MAX_PROCESSING_SAMPLES);
        assert_eq!(samples[0], 5.0);
    }

    #[test]
    fn test_reset() {
        let metrics = MessagingMetrics::new();
        metrics.record_failed("A");
        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
