//! BillingStore port - Payment and subscription records.
//!
//! Every write is conditional so that concurrent handlers cannot both apply a
//! transition: payments check the expected status, subscriptions the expected
//! revision. A `false` return means another writer got there first.

use async_trait::async_trait;

use crate::domain::billing::{PaymentRecord, PaymentStatus, SubscriptionRecord};
use crate::domain::foundation::DomainError;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn find_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>, DomainError>;

    /// Moves a payment from `expected` to `next`.
    async fn transition_payment(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, DomainError>;

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError>;

    /// Inserts a new subscription. Returns `false` if the id already exists.
    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<bool, DomainError>;

    /// Replaces the stored subscription with `updated` if its revision is
    /// still `expected_revision`.
    async fn update_subscription(
        &self,
        updated: &SubscriptionRecord,
        expected_revision: i64,
    ) -> Result<bool, DomainError>;
}
