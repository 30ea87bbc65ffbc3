//! LedgerStore port - Durable record of every verified webhook event.
//!
//! The ledger is the idempotency guard. Implementations MUST make
//! `insert_if_absent` atomic with respect to concurrent callers for the same
//! `event_id`; the PostgreSQL adapter relies on the unique constraint, the
//! in-memory adapter on a single mutex.
//!
//! ## Claim Semantics
//!
//! | Existing row | Result |
//! |--------------|--------|
//! | none | inserted as `processing`, `is_new = true` |
//! | `failed` / `received` | reclaimed to `processing`, `attempts + 1`, `is_new = true` |
//! | `processing` / `succeeded` | unchanged, `is_new = false` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::foundation::DomainError;
use crate::domain::webhooks::{
    LedgerClaim, LedgerQuery, NewLedgerEntry, Outcome, ReclaimResult, WebhookEvent,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically inserts a row for the event or reclaims a claimable one.
    async fn insert_if_absent(&self, entry: NewLedgerEntry) -> Result<LedgerClaim, DomainError>;

    /// Writes a terminal outcome.
    ///
    /// Only applies while the row is `processing`. Returns `false` when no
    /// row matched (already finalized or reclaimed by someone else).
    async fn finalize(
        &self,
        event_id: &str,
        outcome: &Outcome,
        processing_time_ms: i64,
    ) -> Result<bool, DomainError>;

    async fn find(&self, event_id: &str) -> Result<Option<WebhookEvent>, DomainError>;

    /// Lists rows newest first.
    async fn list(&self, query: &LedgerQuery) -> Result<Vec<WebhookEvent>, DomainError>;

    /// Claims a `failed` or `received` row for an operator replay.
    async fn reclaim(&self, event_id: &str) -> Result<ReclaimResult, DomainError>;

    /// Claims up to `limit` rows abandoned in `processing` since before
    /// `cutoff`, plus `received` rows awaiting processing (operator requeues
    /// and failures that followed a deferred answer).
    ///
    /// Concurrent callers never receive the same row.
    async fn claim_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, DomainError>;

    /// Clears `raw_payload` on `succeeded` rows completed before `before`.
    ///
    /// Rows are never deleted: the row is what answers a late redelivery of
    /// its `event_id` as a duplicate. Returns the number of rows compacted.
    async fn compact_succeeded_before(&self, before: DateTime<Utc>) -> Result<u64, DomainError>;
}
