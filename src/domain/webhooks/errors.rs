//! Webhook error types.
//!
//! Per-event failure taxonomy and retryability. `OutcomeReporter` turns
//! these into ledger outcomes and HTTP statuses.

use thiserror::Error;

use super::ledger::EventStatus;
use super::signature::SignatureError;
use crate::domain::foundation::DomainError;
use crate::ports::DispatchError;

/// Errors that occur while processing a single webhook event.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Delivery failed authentication. Nothing is written to the ledger.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Verified event whose object is missing required fields.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Precondition record missing or a concurrent writer won the race.
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    /// Downstream domain action could not be handed off.
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Ledger or billing storage failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Returns true if the event may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::PreconditionNotMet(_)
                | WebhookError::Dispatch(_)
                | WebhookError::Storage(_)
        )
    }

    /// Text persisted in the ledger's `error_message`.
    ///
    /// Storage and dispatcher failures are reduced to a fixed message; their
    /// driver detail goes to the logs only.
    pub fn ledger_message(&self) -> String {
        match self {
            WebhookError::Storage(_) => "storage unavailable".to_string(),
            WebhookError::Dispatch(_) => "domain action dispatch failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Storage(err.to_string())
    }
}

/// Errors from an operator-initiated replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Event {event_id} is {status} and cannot be replayed")]
    NotReplayable {
        event_id: String,
        status: EventStatus,
    },

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

impl From<DomainError> for ReplayError {
    fn from(err: DomainError) -> Self {
        ReplayError::Webhook(err.into())
    }
}
