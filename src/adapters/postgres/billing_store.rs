//! PostgreSQL implementation of BillingStore.
//!
//! Writes are guarded in SQL: payments by `status = expected`, subscriptions
//! by `revision = expected`. Zero affected rows means a concurrent writer won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::billing::{
    PaymentRecord, PaymentStatus, PaymentType, SubscriptionRecord, SubscriptionStatus,
};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::BillingStore;

pub struct PostgresBillingStore {
    pool: PgPool,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    payment_id: String,
    user_id: String,
    amount: i64,
    currency: String,
    status: String,
    payment_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            status: PaymentStatus::parse(&row.status).map_err(invalid_column)?,
            payment_type: PaymentType::parse(&row.payment_type).map_err(invalid_column)?,
            payment_id: row.payment_id,
            user_id: row.user_id,
            amount: row.amount,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    subscription_id: String,
    user_id: String,
    plan: Option<String>,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    source_version: Option<i64>,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionRecord {
            status: SubscriptionStatus::parse(&row.status).map_err(invalid_column)?,
            subscription_id: row.subscription_id,
            user_id: row.user_id,
            plan: row.plan,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            cancel_at_period_end: row.cancel_at_period_end,
            source_version: row.source_version,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn invalid_column(e: crate::domain::foundation::ValidationError) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Invalid stored value: {}", e))
}

#[async_trait]
impl BillingStore for PostgresBillingStore {
    async fn find_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>, DomainError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT payment_id, user_id, amount, currency, status, payment_type,
                   created_at, updated_at
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find payment: {}", e)))?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn transition_payment(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = $3, updated_at = NOW()
            WHERE payment_id = $1 AND status = $2
            "#,
        )
        .bind(payment_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to update payment: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT subscription_id, user_id, plan, status, current_period_start,
                   current_period_end, cancel_at_period_end, source_version, revision,
                   created_at, updated_at
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find subscription: {}", e)))?;

        row.map(SubscriptionRecord::try_from).transpose()
    }

    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                subscription_id, user_id, plan, status, current_period_start,
                current_period_end, cancel_at_period_end, source_version, revision,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (subscription_id) DO NOTHING
            "#,
        )
        .bind(&record.subscription_id)
        .bind(&record.user_id)
        .bind(&record.plan)
        .bind(record.status.as_str())
        .bind(record.current_period_start)
        .bind(record.current_period_end)
        .bind(record.cancel_at_period_end)
        .bind(record.source_version)
        .bind(record.revision)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to insert subscription: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_subscription(
        &self,
        updated: &SubscriptionRecord,
        expected_revision: i64,
    ) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan = $3,
                status = $4,
                current_period_start = $5,
                current_period_end = $6,
                cancel_at_period_end = $7,
                source_version = $8,
                revision = $9,
                updated_at = $10
            WHERE subscription_id = $1 AND revision = $2
            "#,
        )
        .bind(&updated.subscription_id)
        .bind(expected_revision)
        .bind(&updated.plan)
        .bind(updated.status.as_str())
        .bind(updated.current_period_start)
        .bind(updated.current_period_end)
        .bind(updated.cancel_at_period_end)
        .bind(updated.source_version)
        .bind(updated.revision)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to update subscription: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
