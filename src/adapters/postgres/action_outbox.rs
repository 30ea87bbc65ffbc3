//! PostgreSQL domain action outbox.
//!
//! Implements `DomainActionDispatcher` by writing each request to the
//! `domain_action_outbox` table, where downstream billing workers pick it up.
//! The unique `idempotency_key` makes re-issued requests no-ops.
//!
//! ## Outbox Row Lifecycle
//!
//! `pending` on insert; the consuming worker moves it to `published` or
//! `failed`. This adapter only ever inserts.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ports::{ActionRequest, DispatchError, DomainActionDispatcher};

pub struct PostgresActionOutbox {
    pool: PgPool,
}

impl PostgresActionOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainActionDispatcher for PostgresActionOutbox {
    async fn apply(&self, request: ActionRequest) -> Result<(), DispatchError> {
        let payload = serde_json::to_value(&request.action)
            .map_err(|e| DispatchError::Rejected(format!("unserializable action: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO domain_action_outbox (
                id, idempotency_key, event_id, action_kind, payload, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, 'pending', NOW())
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.idempotency_key)
        .bind(&request.event_id)
        .bind(request.action.kind())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| DispatchError::Unavailable(format!("outbox insert failed: {}", e)))?;

        if result.rows_affected() == 0 {
            tracing::debug!(key = %request.idempotency_key, "domain action already in outbox");
        }
        Ok(())
    }
}
