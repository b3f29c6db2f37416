// Copyright (c) 2025 - Cowboy AI, Inc.
//! Dead letter administration
//!
//! Operations for inspecting, reprocessing and purging dead letters, grouped
//! by the event type they were delivered on. Listings are paginated newest
//! first.

use serde::Serialize;
use tracing::{info, warn};

use super::ResilientEventService;
use crate::errors::MessagingResult;
use crate::resilience::DeadLetterEntry;

/// Page size used when callers do not choose one
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest accepted page size
pub const MAX_PAGE_LIMIT: usize = 100;

/// Pagination metadata for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
    pub pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Compute metadata for `total` items, normalizing `page` and `limit`
    ///
    /// `page` is raised to at least 1 and `limit` is clamped to
    /// `1..=MAX_PAGE_LIMIT`.
    pub fn new(total: usize, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let pages = total.div_ceil(limit);
        Self {
            total,
            page,
            limit,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl ResilientEventService {
    /// Event types that currently have dead letters, sorted
    pub fn list_event_types(&self) -> Vec<String> {
        self.dead_letter_queue.queues()
    }

    /// Dead letters for one event type, newest first
    pub fn list_events(&self, event_type: &str, page: usize, limit: usize) -> Page<DeadLetterEntry> {
        let mut entries = self.dead_letter_queue.messages_for_queue(event_type);
        entries.reverse();

        let pagination = Pagination::new(entries.len(), page, limit);
        let items = entries
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit)
            .collect();

        Page { items, pagination }
    }

    /// Take a dead letter out of the queue and publish its event again
    ///
    /// Returns `Ok(false)` when no entry with that id exists for the type.
    /// If the republish fails the entry is put back and the error returned.
    pub async fn reprocess_event(&self, event_type: &str, id: &str) -> MessagingResult<bool> {
        let belongs = self
            .dead_letter_queue
            .get_message(id)
            .is_some_and(|entry| entry.original_queue == event_type);
        if !belongs {
            return Ok(false);
        }
        let Some(entry) = self.dead_letter_queue.retry_message(id) else {
            return Ok(false);
        };

        match self.publish_event(&entry.original_message).await {
            Ok(()) => {
                info!(event_type = %event_type, message_id = %id, "dead letter reprocessed");
                Ok(true)
            }
            Err(e) => {
                warn!(
                    event_type = %event_type,
                    message_id = %id,
                    error = %e,
                    "reprocessing failed, restoring dead letter"
                );
                self.dead_letter_queue.restore(entry);
                Err(e)
            }
        }
    }

    /// Drop every dead letter for one event type, returning how many
    pub fn purge_events(&self, event_type: &str) -> usize {
        let purged = self.dead_letter_queue.remove_queue(event_type);
        if purged > 0 {
            info!(event_type = %event_type, purged, "dead letters purged");
        }
        purged
    }
}
