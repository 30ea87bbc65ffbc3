//! In-memory billing records for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::billing::{PaymentRecord, PaymentStatus, SubscriptionRecord};
use crate::domain::foundation::DomainError;
use crate::ports::BillingStore;

#[derive(Default)]
pub struct InMemoryBillingStore {
    payments: RwLock<HashMap<String, PaymentRecord>>,
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a payment as the checkout flow would.
    pub async fn insert_payment(&self, payment: PaymentRecord) {
        self.payments
            .write()
            .await
            .insert(payment.payment_id.clone(), payment);
    }

    /// Stores a subscription unconditionally.
    pub async fn put_subscription(&self, record: SubscriptionRecord) {
        self.subscriptions
            .write()
            .await
            .insert(record.subscription_id.clone(), record);
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_payment(&self, payment_id: &str) -> Result<Option<PaymentRecord>, DomainError> {
        Ok(self.payments.read().await.get(payment_id).cloned())
    }

    async fn transition_payment(
        &self,
        payment_id: &str,
        expected: PaymentStatus,
        next: PaymentStatus,
    ) -> Result<bool, DomainError> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(payment_id) {
            Some(payment) if payment.status == expected => {
                payment.status = next;
                payment.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, DomainError> {
        Ok(self.subscriptions.read().await.get(subscription_id).cloned())
    }

    async fn insert_subscription(&self, record: &SubscriptionRecord) -> Result<bool, DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&record.subscription_id) {
            return Ok(false);
        }
        subscriptions.insert(record.subscription_id.clone(), record.clone());
        Ok(true)
    }

    async fn update_subscription(
        &self,
        updated: &SubscriptionRecord,
        expected_revision: i64,
    ) -> Result<bool, DomainError> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get_mut(&updated.subscription_id) {
            Some(current) if current.revision == expected_revision => {
                *current = updated.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
