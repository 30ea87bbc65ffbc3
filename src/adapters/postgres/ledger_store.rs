//! PostgreSQL implementation of LedgerStore.
//!
//! The claim is a single `INSERT ... ON CONFLICT ... DO UPDATE ... WHERE ...
//! RETURNING` statement. A returned row means this caller owns processing;
//! no row means another delivery holds or finished the event, and the
//! existing row is read back for the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::webhooks::{
    EventStatus, LedgerClaim, LedgerQuery, NewLedgerEntry, Outcome, ReclaimResult, WebhookEvent,
};
use crate::ports::LedgerStore;

const ROW_COLUMNS: &str = "event_id, event_type, status, received_at, processing_started_at, \
     processing_completed_at, processing_time_ms, error_message, note, raw_payload, \
     client_ip, request_id, attempts";

pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a ledger entry.
#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    event_id: String,
    event_type: String,
    status: String,
    received_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processing_completed_at: Option<DateTime<Utc>>,
    processing_time_ms: Option<i64>,
    error_message: Option<String>,
    note: Option<String>,
    raw_payload: String,
    client_ip: Option<String>,
    request_id: Option<String>,
    attempts: i32,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = DomainError;

    fn try_from(row: WebhookEventRow) -> Result<Self, Self::Error> {
        let status = EventStatus::parse(&row.status).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid event status: {}", e))
        })?;

        Ok(WebhookEvent {
            event_id: row.event_id,
            event_type: row.event_type,
            status,
            received_at: row.received_at,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
            processing_time_ms: row.processing_time_ms,
            error_message: row.error_message,
            note: row.note,
            raw_payload: row.raw_payload,
            client_ip: row.client_ip,
            request_id: row.request_id,
            attempts: row.attempts,
        })
    }
}

fn db_error(context: &str, e: sqlx::Error) -> DomainError {
    DomainError::database(format!("{}: {}", context, e))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn insert_if_absent(&self, entry: NewLedgerEntry) -> Result<LedgerClaim, DomainError> {
        let claimed: Option<WebhookEventRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO webhook_events (
                event_id, event_type, status, received_at, processing_started_at,
                raw_payload, client_ip, request_id, attempts
            ) VALUES ($1, $2, 'processing', NOW(), NOW(), $3, $4, $5, 1)
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'processing',
                processing_started_at = NOW(),
                processing_completed_at = NULL,
                processing_time_ms = NULL,
                error_message = NULL,
                note = NULL,
                client_ip = COALESCE(EXCLUDED.client_ip, webhook_events.client_ip),
                request_id = COALESCE(EXCLUDED.request_id, webhook_events.request_id),
                attempts = webhook_events.attempts + 1
            WHERE webhook_events.status IN ('failed', 'received')
            RETURNING {}
            "#,
            ROW_COLUMNS
        ))
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.raw_payload)
        .bind(&entry.client_ip)
        .bind(&entry.request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim webhook event", e))?;

        if let Some(row) = claimed {
            return Ok(LedgerClaim {
                is_new: true,
                record: row.try_into()?,
            });
        }

        let existing = self.find(&entry.event_id).await?.ok_or_else(|| {
            DomainError::new(
                ErrorCode::EventNotFound,
                format!("Webhook event {} vanished during claim", entry.event_id),
            )
        })?;
        Ok(LedgerClaim {
            is_new: false,
            record: existing,
        })
    }

    async fn finalize(
        &self,
        event_id: &str,
        outcome: &Outcome,
        processing_time_ms: i64,
    ) -> Result<bool, DomainError> {
        let note = match outcome {
            Outcome::Succeeded { note } => note.clone(),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                status = $2,
                processing_completed_at = NOW(),
                processing_time_ms = $3,
                error_message = $4,
                note = $5
            WHERE event_id = $1 AND status = 'processing'
            "#,
        )
        .bind(event_id)
        .bind(outcome.status().as_str())
        .bind(processing_time_ms)
        .bind(outcome.error_message())
        .bind(note)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to finalize webhook event", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, event_id: &str) -> Result<Option<WebhookEvent>, DomainError> {
        let row: Option<WebhookEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM webhook_events WHERE event_id = $1",
            ROW_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find webhook event", e))?;

        row.map(WebhookEvent::try_from).transpose()
    }

    async fn list(&self, query: &LedgerQuery) -> Result<Vec<WebhookEvent>, DomainError> {
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM webhook_events
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY received_at DESC, event_id
            LIMIT $2 OFFSET $3
            "#,
            ROW_COLUMNS
        ))
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list webhook events", e))?;

        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn reclaim(&self, event_id: &str) -> Result<ReclaimResult, DomainError> {
        let claimed: Option<WebhookEventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE webhook_events SET
                status = 'processing',
                processing_started_at = NOW(),
                processing_completed_at = NULL,
                processing_time_ms = NULL,
                error_message = NULL,
                note = NULL,
                attempts = attempts + 1
            WHERE event_id = $1 AND status IN ('failed', 'received')
            RETURNING {}
            "#,
            ROW_COLUMNS
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to reclaim webhook event", e))?;

        if let Some(row) = claimed {
            return Ok(ReclaimResult::Claimed(row.try_into()?));
        }

        Ok(match self.find(event_id).await? {
            Some(existing) => ReclaimResult::NotClaimable(existing.status),
            None => ReclaimResult::NotFound,
        })
    }

    async fn claim_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, DomainError> {
        let rows: Vec<WebhookEventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE webhook_events SET
                status = 'processing',
                processing_started_at = NOW(),
                processing_completed_at = NULL,
                processing_time_ms = NULL,
                error_message = NULL,
                note = NULL,
                attempts = attempts + 1
            WHERE event_id IN (
                SELECT event_id FROM webhook_events
                WHERE status = 'received'
                   OR (status = 'processing' AND processing_started_at < $1)
                ORDER BY received_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            ROW_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim stale webhook events", e))?;

        rows.into_iter().map(WebhookEvent::try_from).collect()
    }

    async fn compact_succeeded_before(&self, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET raw_payload = ''
            WHERE status = 'succeeded'
              AND processing_completed_at < $1
              AND raw_payload <> ''
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to compact webhook events", e))?;

        Ok(result.rows_affected())
    }
}
