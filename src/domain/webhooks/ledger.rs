//! Event ledger types.
//!
//! One `WebhookEvent` row exists per provider event id. The row is both the
//! idempotency record and the audit trail: it keeps the verified payload,
//! where it came from, and how processing ended.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, ValidationError};

/// Processing status of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Stored but not claimed. Rows land here when an operator requeues
    /// them, or when a failure after a deferred answer hands the retry to
    /// reconciliation.
    Received,
    /// Claimed by exactly one worker.
    Processing,
    /// Applied or deliberately acknowledged without effect.
    Succeeded,
    /// Processing failed; the next delivery reclaims the row.
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Received => "received",
            EventStatus::Processing => "processing",
            EventStatus::Succeeded => "succeeded",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "received" => Ok(EventStatus::Received),
            "processing" => Ok(EventStatus::Processing),
            "succeeded" => Ok(EventStatus::Succeeded),
            "failed" => Ok(EventStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "event_status",
                format!("unknown value '{}'", other),
            )),
        }
    }

    /// Whether a new delivery or a replay may claim a row in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(self, EventStatus::Received | EventStatus::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for EventStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use EventStatus::*;
        matches!(
            (self, target),
            (Received, Processing)
                | (Failed, Processing)
                // stale claim taken over by reconciliation
                | (Processing, Processing)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Processing, Received)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use EventStatus::*;
        match self {
            Received | Failed => vec![Processing],
            Processing => vec![Processing, Succeeded, Failed, Received],
            Succeeded => vec![],
        }
    }
}

/// A row of the event ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    /// Raw provider type string, including types the router does not know.
    pub event_type: String,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    /// Last failure. Set when `status` is `Failed`, or `Received` after a
    /// requeue.
    pub error_message: Option<String>,
    /// Why a succeeded event had no effect, if it had none.
    pub note: Option<String>,
    /// Verified body, byte-for-byte as delivered. Empty once retention has
    /// compacted a succeeded row.
    pub raw_payload: String,
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
    /// Times processing has been claimed.
    pub attempts: i32,
}

impl WebhookEvent {
    /// A freshly claimed row, as written on first delivery.
    pub fn claimed(entry: NewLedgerEntry, now: DateTime<Utc>) -> Self {
        Self {
            event_id: entry.event_id,
            event_type: entry.event_type,
            status: EventStatus::Processing,
            received_at: now,
            processing_started_at: Some(now),
            processing_completed_at: None,
            processing_time_ms: None,
            error_message: None,
            note: None,
            raw_payload: entry.raw_payload,
            client_ip: entry.client_ip,
            request_id: entry.request_id,
            attempts: 1,
        }
    }

    /// Moves the row back into `Processing` for another attempt.
    ///
    /// Provenance is refreshed when the reclaiming delivery carries its own.
    pub fn reclaim(&mut self, provenance: Option<&NewLedgerEntry>, now: DateTime<Utc>) {
        self.status = EventStatus::Processing;
        self.processing_started_at = Some(now);
        self.processing_completed_at = None;
        self.processing_time_ms = None;
        self.error_message = None;
        self.note = None;
        self.attempts += 1;
        if let Some(entry) = provenance {
            self.client_ip = entry.client_ip.clone().or_else(|| self.client_ip.take());
            self.request_id = entry.request_id.clone().or_else(|| self.request_id.take());
        }
    }

    /// Writes a terminal outcome onto the row.
    pub fn complete(&mut self, outcome: &Outcome, processing_time_ms: i64, now: DateTime<Utc>) {
        self.status = outcome.status();
        self.processing_completed_at = Some(now);
        self.processing_time_ms = Some(processing_time_ms);
        match outcome {
            Outcome::Succeeded { note } => {
                self.error_message = None;
                self.note = note.clone();
            }
            Outcome::Failed { error_message, .. } | Outcome::Requeued { error_message } => {
                self.error_message = Some(error_message.clone());
                self.note = None;
            }
        }
    }

    /// Drops the stored payload. The row itself stays as the idempotency
    /// record for its `event_id`.
    pub fn compact(&mut self) {
        self.raw_payload.clear();
    }
}

/// What the intake path knows about a verified delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub event_id: String,
    pub event_type: String,
    pub raw_payload: String,
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
}

/// Result of the idempotency guard.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerClaim {
    /// True when this caller owns processing of the event.
    pub is_new: bool,
    /// The row as it stands after the claim attempt.
    pub record: WebhookEvent,
}

/// Result of an operator replay claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ReclaimResult {
    Claimed(WebhookEvent),
    NotFound,
    NotClaimable(EventStatus),
}

/// Outcome recorded for a claimed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        note: Option<String>,
    },
    /// The provider sees the failure and owns the retry.
    Failed {
        error_message: String,
        retryable: bool,
    },
    /// The provider was already answered 200; reconciliation owns the retry.
    Requeued {
        error_message: String,
    },
}

impl Outcome {
    pub fn status(&self) -> EventStatus {
        match self {
            Outcome::Succeeded { .. } => EventStatus::Succeeded,
            Outcome::Failed { .. } => EventStatus::Failed,
            Outcome::Requeued { .. } => EventStatus::Received,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded { .. } => None,
            Outcome::Failed { error_message, .. } | Outcome::Requeued { error_message } => {
                Some(error_message)
            }
        }
    }
}

/// Filter and page for listing ledger rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerQuery {
    pub status: Option<EventStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for LedgerQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}
