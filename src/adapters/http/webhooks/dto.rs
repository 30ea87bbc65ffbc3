//! Data Transfer Objects for webhook intake and ledger admin endpoints.
//!
//! These types decouple the HTTP API from domain types, allowing
//! independent evolution of the API contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;
use crate::domain::webhooks::{EventStatus, LedgerQuery, WebhookEvent};

/// Largest page the admin listing will return.
pub const MAX_PAGE_SIZE: i64 = 200;

// ════════════════════════════════════════════════════════════════════════════════
// Intake
// ════════════════════════════════════════════════════════════════════════════════

/// Body of every `POST /webhooks/{provider}` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: String,
    pub event_id: Option<String>,
}

impl WebhookResponse {
    pub fn new(status: impl Into<String>, event_id: Option<String>) -> Self {
        Self {
            status: status.into(),
            event_id,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Ledger admin
// ════════════════════════════════════════════════════════════════════════════════

/// Query string for `GET /admin/webhooks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListEventsQuery {
    /// Converts to a ledger query, clamping the page to sane bounds.
    pub fn into_ledger_query(self) -> Result<LedgerQuery, ValidationError> {
        let defaults = LedgerQuery::default();
        let status = self.status.as_deref().map(EventStatus::parse).transpose()?;
        Ok(LedgerQuery {
            status,
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

/// A ledger row without its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEventSummary {
    pub event_id: String,
    pub event_type: String,
    pub status: String,
    pub received_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub note: Option<String>,
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
    pub attempts: i32,
}

impl From<&WebhookEvent> for LedgerEventSummary {
    fn from(row: &WebhookEvent) -> Self {
        Self {
            event_id: row.event_id.clone(),
            event_type: row.event_type.clone(),
            status: row.status.as_str().to_string(),
            received_at: row.received_at,
            processing_started_at: row.processing_started_at,
            processing_completed_at: row.processing_completed_at,
            processing_time_ms: row.processing_time_ms,
            error_message: row.error_message.clone(),
            note: row.note.clone(),
            client_ip: row.client_ip.clone(),
            request_id: row.request_id.clone(),
            attempts: row.attempts,
        }
    }
}

/// A single ledger row including the stored payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEventDetail {
    #[serde(flatten)]
    pub summary: LedgerEventSummary,
    pub raw_payload: String,
}

impl From<WebhookEvent> for LedgerEventDetail {
    fn from(row: WebhookEvent) -> Self {
        Self {
            summary: LedgerEventSummary::from(&row),
            raw_payload: row.raw_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEventListResponse {
    pub events: Vec<LedgerEventSummary>,
    pub limit: i64,
    pub offset: i64,
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Response
// ════════════════════════════════════════════════════════════════════════════════

/// Standard error response for admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
