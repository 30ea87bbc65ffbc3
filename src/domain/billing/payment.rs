//! Payment records and their monotonic status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, ValidationError};

/// Status of a single payment attempt.
///
/// `Succeeded` and `Failed` are terminal: once a payment leaves `Pending`
/// it never moves again, whatever order provider events arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout intent recorded, awaiting the provider's verdict.
    Pending,
    /// Provider confirmed the charge.
    Succeeded,
    /// Provider reported the charge as failed.
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "payment_status",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        matches!((self, target), (Pending, Succeeded) | (Pending, Failed))
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Pending => vec![Succeeded, Failed],
            Succeeded | Failed => vec![],
        }
    }
}

/// Whether the payment is a single purchase or part of a recurring plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    OneTime,
    Recurring,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::OneTime => "one_time",
            PaymentType::Recurring => "recurring",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "one_time" => Ok(PaymentType::OneTime),
            "recurring" => Ok(PaymentType::Recurring),
            other => Err(ValidationError::invalid_format(
                "payment_type",
                format!("unknown value '{}'", other),
            )),
        }
    }
}

/// A payment owned by the billing subsystem.
///
/// Created upstream when checkout starts. This engine only moves its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Provider reference (e.g. `pay_...`).
    pub payment_id: String,
    pub user_id: String,
    /// Amount in minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_type: PaymentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Creates a pending payment, as the checkout flow would.
    pub fn pending(
        payment_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        payment_type: PaymentType,
    ) -> Self {
        let now = Utc::now();
        Self {
            payment_id: payment_id.into(),
            user_id: user_id.into(),
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            payment_type,
            created_at: now,
            updated_at: now,
        }
    }
}
