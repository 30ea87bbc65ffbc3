//! DomainActionDispatcher port - Hands side effects to the billing subsystem.
//!
//! Handlers call `apply` after their state transition commits. The same
//! request can arrive more than once (redeliveries re-issue side effects), so
//! implementations MUST deduplicate on `idempotency_key`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business-level effect of an applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainAction {
    GrantCredits {
        user_id: String,
        payment_id: String,
        amount: i64,
        currency: String,
    },
    ActivatePlan {
        user_id: String,
        subscription_id: String,
        plan: Option<String>,
    },
    RevokePlan {
        user_id: String,
        subscription_id: String,
        effective_at: Option<DateTime<Utc>>,
    },
    NotifyUser {
        user_id: String,
        notice: UserNotice,
    },
}

impl DomainAction {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainAction::GrantCredits { .. } => "grant_credits",
            DomainAction::ActivatePlan { .. } => "activate_plan",
            DomainAction::RevokePlan { .. } => "revoke_plan",
            DomainAction::NotifyUser { .. } => "notify_user",
        }
    }
}

/// Notification sent to the account owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum UserNotice {
    PaymentFailed {
        payment_id: String,
        reason: Option<String>,
    },
    PastDue {
        subscription_id: String,
    },
    Dunning {
        subscription_id: String,
        attempt_count: Option<u32>,
        next_attempt: Option<DateTime<Utc>>,
    },
}

/// A side effect plus the key that makes it safe to re-issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub idempotency_key: String,
    /// Provider event that caused the action.
    pub event_id: String,
    pub action: DomainAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Dispatcher unavailable: {0}")]
    Unavailable(String),

    #[error("Action rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DomainActionDispatcher: Send + Sync {
    async fn apply(&self, request: ActionRequest) -> Result<(), DispatchError>;
}
