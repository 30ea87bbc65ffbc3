//! In-memory event ledger for tests and local development.
//!
//! A single mutex around the row map stands in for the database's unique
//! constraint: every claim decision is made while holding it, so concurrent
//! deliveries of one event observe each other exactly as they would in
//! PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::foundation::DomainError;
use crate::domain::webhooks::{
    EventStatus, LedgerClaim, LedgerQuery, NewLedgerEntry, Outcome, ReclaimResult, WebhookEvent,
};
use crate::ports::LedgerStore;

#[derive(Default)]
pub struct InMemoryLedgerStore {
    rows: Mutex<HashMap<String, WebhookEvent>>,
    /// Remaining finalize calls that should fail.
    failing_finalizes: AtomicUsize,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// Makes the next `count` finalize calls return a storage error.
    pub fn fail_finalize(&self, count: usize) {
        self.failing_finalizes.store(count, Ordering::SeqCst);
    }

    /// Number of rows stored.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    /// Overwrites a row as-is, bypassing claim rules.
    pub async fn put(&self, row: WebhookEvent) {
        self.rows.lock().await.insert(row.event_id.clone(), row);
    }

    fn take_finalize_failure(&self) -> bool {
        self.failing_finalizes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert_if_absent(&self, entry: NewLedgerEntry) -> Result<LedgerClaim, DomainError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        match rows.get_mut(&entry.event_id) {
            None => {
                let record = WebhookEvent::claimed(entry, now);
                rows.insert(record.event_id.clone(), record.clone());
                Ok(LedgerClaim {
                    is_new: true,
                    record,
                })
            }
            Some(existing) if existing.status.is_claimable() => {
                existing.reclaim(Some(&entry), now);
                Ok(LedgerClaim {
                    is_new: true,
                    record: existing.clone(),
                })
            }
            Some(existing) => Ok(LedgerClaim {
                is_new: false,
                record: existing.clone(),
            }),
        }
    }

    async fn finalize(
        &self,
        event_id: &str,
        outcome: &Outcome,
        processing_time_ms: i64,
    ) -> Result<bool, DomainError> {
        if self.take_finalize_failure() {
            return Err(DomainError::database("simulated finalize failure"));
        }

        let mut rows = self.rows.lock().await;
        match rows.get_mut(event_id) {
            Some(row) if row.status == EventStatus::Processing => {
                row.complete(outcome, processing_time_ms, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, event_id: &str) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.rows.lock().await.get(event_id).cloned())
    }

    async fn list(&self, query: &LedgerQuery) -> Result<Vec<WebhookEvent>, DomainError> {
        let rows = self.rows.lock().await;
        let mut matching: Vec<WebhookEvent> = rows
            .values()
            .filter(|row| query.status.map_or(true, |s| row.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn reclaim(&self, event_id: &str) -> Result<ReclaimResult, DomainError> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(event_id) {
            None => Ok(ReclaimResult::NotFound),
            Some(row) if row.status.is_claimable() => {
                row.reclaim(None, Utc::now());
                Ok(ReclaimResult::Claimed(row.clone()))
            }
            Some(row) => Ok(ReclaimResult::NotClaimable(row.status)),
        }
    }

    async fn claim_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, DomainError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<&mut WebhookEvent> = rows
            .values_mut()
            .filter(|row| match row.status {
                EventStatus::Received => true,
                EventStatus::Processing => row
                    .processing_started_at
                    .map_or(true, |started| started < cutoff),
                _ => false,
            })
            .collect();
        candidates.sort_by_key(|row| row.received_at);

        Ok(candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|row| {
                row.reclaim(None, now);
                row.clone()
            })
            .collect())
    }

    async fn compact_succeeded_before(&self, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut rows = self.rows.lock().await;
        let mut compacted = 0;
        for row in rows.values_mut().filter(|row| {
            row.status == EventStatus::Succeeded
                && !row.raw_payload.is_empty()
                && row.processing_completed_at.map_or(false, |done| done < before)
        }) {
            row.compact();
            compacted += 1;
        }
        Ok(compacted)
    }
}
