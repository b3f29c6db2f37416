// Copyright (c) 2025 - Cowboy AI, Inc.
//! Subscribe path scenarios: handler failures, dead letters and reprocessing

mod fixtures;

use anyhow::bail;
use bytes::Bytes;
use cim_messaging_resilience::{BrokerTransport, Event, MessagingError};
use fixtures::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

async fn always_broken(_event: Event) -> anyhow::Result<()> {
    bail!("always broken")
}

async fn also_broken(_event: Event) -> anyhow::Result<()> {
    bail!("also broken")
}

/// User Story: Failed events are captured for inspection
///
/// As an operator
/// I want events whose handler failed to land in a dead letter queue
/// So that no event is silently lost
///
/// ```mermaid
/// graph LR
///     Broker -->|deliver| Service
///     Service -->|dispatch| Handler
///     Handler -->|error| DLQ[Dead Letter Queue]
///     DLQ -->|reprocess| Service
///     Service -->|publish| Broker
/// ```
///
/// Acceptance Criteria:
/// - A failing handler produces exactly one dead letter
/// - The entry records the event type as its queue and 3 attempts
/// - Reprocessing removes the entry and publishes the event again
#[tokio::test]
async fn test_failing_handler_dead_letters_and_reprocesses() {
    let (transport, service) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    // Given a handler that always fails
    let seen = calls.clone();
    service
        .subscribe_fn(USER_CREATED, move |_event| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                bail!("downstream rejected the user")
            }
        })
        .await
        .unwrap();

    // When an event is published and delivered
    service.publish(USER_CREATED, json!({"user_id": 42})).await.unwrap();
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);

    // Then exactly one dead letter describes the failure
    let entries = service.dead_letter_queue().get_all_messages();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.original_queue, USER_CREATED);
    assert_eq!(entry.retry_count, 3);
    assert_eq!(entry.message_id, entry.original_message.id);
    assert_eq!(entry.original_message.payload, json!({"user_id": 42}));
    assert!(entry.error.contains("downstream rejected the user"));

    let counters = service.get_metrics().event_types[USER_CREATED];
    assert_eq!(counters.failed, 1);
    assert_eq!(counters.dead_lettered, 1);

    // When the entry is reprocessed
    let published_before = transport.published().len();
    let reprocessed = service
        .reprocess_event(USER_CREATED, &entry.message_id)
        .await
        .unwrap();

    // Then it left the queue and the same event was published again
    assert!(reprocessed);
    let published = transport.published();
    assert_eq!(published.len(), published_before + 1);
    let republished = Event::from_bytes(&published[published.len() - 1].1).unwrap();
    assert_eq!(republished, entry.original_message);

    // And the still-failing handler dead-letters it once more under the same id
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2).await);
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);
    assert!(service.dead_letter_queue().get_message(&entry.message_id).is_some());
}

/// User Story: A recovered consumer drains its dead letters
///
/// Acceptance Criteria:
/// - After the handler is fixed, reprocessing empties the queue for good
#[tokio::test]
async fn test_reprocess_after_consumer_recovers() {
    let (_transport, service) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    // Given a handler that fails only on its first call
    let seen = calls.clone();
    service
        .subscribe_fn(USER_CREATED, move |_event| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    bail!("database warming up");
                }
                Ok(())
            }
        })
        .await
        .unwrap();

    service.publish(USER_CREATED, json!({})).await.unwrap();
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);
    let id = service.dead_letter_queue().get_all_messages()[0].message_id.clone();

    // When the dead letter is reprocessed
    assert!(service.reprocess_event(USER_CREATED, &id).await.unwrap());

    // Then the second delivery succeeds and the queue stays empty
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2).await);
    assert!(service.dead_letter_queue().is_empty());
    assert!(service.list_event_types().is_empty());
}

/// User Story: Reprocessing never loses an entry
///
/// Acceptance Criteria:
/// - If the republish fails, the entry is restored unchanged
/// - The publish error is returned to the operator
/// - Unknown ids and mismatched types report false
#[tokio::test]
async fn test_reprocess_restores_entry_when_publish_fails() {
    let (transport, service) = setup();
    let event = user_created_fixture(EVENT_ID_1);
    service
        .dead_letter_queue()
        .add_message(EVENT_ID_1, event, "handler failed", 3, USER_CREATED);
    let original = service.dead_letter_queue().get_message(EVENT_ID_1).unwrap();

    // Given an unreachable broker
    transport.set_reachable(false);

    // When the entry is reprocessed
    let err = service
        .reprocess_event(USER_CREATED, EVENT_ID_1)
        .await
        .unwrap_err();

    // Then the error surfaces and the entry is back
    assert!(matches!(err, MessagingError::RetryExhausted { .. }));
    assert_eq!(service.dead_letter_queue().get_message(EVENT_ID_1), Some(original));

    // And lookups that do not match report false
    transport.set_reachable(true);
    assert!(!service.reprocess_event(USER_CREATED, EVENT_ID_2).await.unwrap());
    assert!(!service.reprocess_event(ORDER_PLACED, EVENT_ID_1).await.unwrap());
    assert_eq!(service.dead_letter_queue().size(), 1);
}

/// User Story: Panicking handlers are contained
///
/// Acceptance Criteria:
/// - A handler panic is dead-lettered like an error
/// - Later deliveries still reach the handler
#[tokio::test]
async fn test_handler_panic_is_dead_lettered() {
    let (_transport, service) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let seen = calls.clone();
    service
        .subscribe_fn(ORDER_PLACED, move |event: Event| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if event.payload["explode"] == json!(true) {
                    panic!("order total overflowed");
                }
                Ok(())
            }
        })
        .await
        .unwrap();

    service.publish(ORDER_PLACED, json!({"explode": true})).await.unwrap();
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);

    let entries = service.dead_letter_queue().get_all_messages();
    let entry = &entries[0];
    assert!(entry.error.contains("panicked"));
    assert!(entry.error.contains("order total overflowed"));

    service.publish(ORDER_PLACED, json!({"explode": false})).await.unwrap();
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2).await);
    assert_eq!(service.dead_letter_queue().size(), 1);
}

/// User Story: One bad handler does not break the others
///
/// As a team sharing an event type with other teams
/// I want my handler to keep receiving events when theirs fails
/// So that failures stay local to the failing consumer
///
/// Acceptance Criteria:
/// - The healthy handler receives the event
/// - Only the failing handler is metered and dead-lettered
#[tokio::test]
async fn test_failing_handler_does_not_block_other_handlers() {
    let (_transport, service) = setup();
    let healthy_calls = Arc::new(AtomicU32::new(0));

    service
        .subscribe_fn(USER_CREATED, always_broken)
        .await
        .unwrap();
    let seen = healthy_calls.clone();
    service
        .subscribe_fn(USER_CREATED, move |_event| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    service.publish(USER_CREATED, json!({})).await.unwrap();

    assert!(wait_until(|| healthy_calls.load(Ordering::SeqCst) == 1).await);
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);

    let metrics = service.metrics().event_type_metrics(USER_CREATED).unwrap();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.dead_lettered, 1);
    // one publish latency plus one successful handler run
    assert!(wait_until(|| {
        service
            .metrics()
            .event_type_metrics(USER_CREATED)
            .map(|m| m.processing_time_samples.len())
            == Some(2)
    })
    .await);
}

/// User Story: One delivery, one dead letter
///
/// Acceptance Criteria:
/// - Two handlers failing on the same event leave a single entry
/// - Both failures are counted, the dead letter once
#[tokio::test]
async fn test_two_failing_handlers_dead_letter_once() {
    let (_transport, service) = setup();
    service.subscribe_fn(USER_CREATED, always_broken).await.unwrap();
    service.subscribe_fn(USER_CREATED, also_broken).await.unwrap();

    service.publish(USER_CREATED, json!({})).await.unwrap();
    assert!(wait_until(|| service.dead_letter_queue().size() == 1).await);

    let counters = service.get_metrics().event_types[USER_CREATED];
    assert_eq!(counters.failed, 2);
    assert_eq!(counters.dead_lettered, 1);
    assert_eq!(
        service.get_metrics().total_dead_lettered,
        service.dead_letter_queue().size() as u64
    );
}

/// User Story: Garbage on the wire is dropped, not fatal
///
/// Acceptance Criteria:
/// - An undecodable delivery reaches no handler and no dead letter
/// - Valid events that follow are still delivered
#[tokio::test]
async fn test_undecodable_delivery_is_dropped() {
    let (transport, service) = setup();
    let calls = Arc::new(AtomicU32::new(0));

    let seen = calls.clone();
    service
        .subscribe_fn(USER_CREATED, move |_event| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    transport
        .publish("events.USER_CREATED", Bytes::from_static(b"not json"))
        .await
        .unwrap();
    service.publish(USER_CREATED, json!({})).await.unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1).await);
    assert!(service.dead_letter_queue().is_empty());
}

/// User Story: Operators browse and purge dead letters by event type
///
/// Acceptance Criteria:
/// - Event types with dead letters are listed
/// - Listings are newest first with pagination metadata
/// - Purging removes only the chosen type and reports how many
#[tokio::test]
async fn test_admin_listing_and_purge() {
    let (_transport, service) = setup();
    let dlq = service.dead_letter_queue();

    for n in 0..25 {
        let id = format!("user-{:02}", n);
        dlq.add_message(id.clone(), user_created_fixture(&id), "failed", 3, USER_CREATED);
    }
    dlq.add_message("order-00", user_created_fixture("order-00"), "failed", 3, ORDER_PLACED);

    assert_eq!(service.list_event_types(), vec![ORDER_PLACED, USER_CREATED]);

    // First page holds the ten newest entries
    let page = service.list_events(USER_CREATED, 1, 10);
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items[0].message_id, "user-24");
    assert_eq!(page.items[9].message_id, "user-15");
    assert_eq!(page.pagination.total, 25);
    assert_eq!(page.pagination.pages, 3);
    assert!(page.pagination.has_next);
    assert!(!page.pagination.has_prev);

    // Last page holds the remainder
    let page = service.list_events(USER_CREATED, 3, 10);
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.items[4].message_id, "user-00");
    assert!(!page.pagination.has_next);
    assert!(page.pagination.has_prev);

    // Beyond the end is empty but still describes the listing
    let page = service.list_events(USER_CREATED, 4, 10);
    assert!(page.items.is_empty());
    assert_eq!(page.pagination.total, 25);

    // Purge one type only
    assert_eq!(service.purge_events(USER_CREATED), 25);
    assert_eq!(service.purge_events(USER_CREATED), 0);
    assert_eq!(service.list_event_types(), vec![ORDER_PLACED]);
}
