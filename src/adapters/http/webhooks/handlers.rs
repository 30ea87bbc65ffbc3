//! HTTP handlers for webhook intake and the ledger admin endpoints.
//!
//! Intake reads the body as raw bytes so the signature is checked against
//! exactly what the provider signed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;

use crate::config::{ServerConfig, ValidationError, WebhookConfig};
use crate::domain::foundation::DomainError;
use crate::domain::webhooks::{
    OutcomeReporter, Provenance, ReplayError, RetryOwner, WebhookError, WebhookProcessor,
    WebhookResult,
};
use crate::ports::LedgerStore;

use super::dto::{
    ErrorResponse, LedgerEventDetail, LedgerEventListResponse, LedgerEventSummary,
    ListEventsQuery, WebhookResponse,
};

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for the webhook router.
///
/// Cloned for each request; all dependencies are Arc-wrapped.
#[derive(Clone)]
pub struct WebhookAppState {
    pub processor: WebhookProcessor,
    pub ledger: Arc<dyn LedgerStore>,
    /// Provider served at `POST /webhooks/{provider}`.
    pub provider: String,
    pub signature_header: HeaderName,
    /// Admin routes are mounted only when set.
    pub admin_token: Option<Arc<SecretString>>,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl WebhookAppState {
    pub fn new(
        processor: WebhookProcessor,
        ledger: Arc<dyn LedgerStore>,
        server: &ServerConfig,
        webhook: &WebhookConfig,
    ) -> Result<Self, ValidationError> {
        let signature_header = HeaderName::from_bytes(webhook.signature_header.as_bytes())
            .map_err(|_| ValidationError::InvalidSignatureHeader(webhook.signature_header.clone()))?;

        Ok(Self {
            processor,
            ledger,
            provider: webhook.provider.clone(),
            signature_header,
            admin_token: webhook.admin_token.clone().map(Arc::new),
            max_body_bytes: webhook.max_body_bytes,
            request_timeout: server.request_timeout(),
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Intake
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/{provider} - Receive one provider delivery
pub async fn receive_webhook(
    State(state): State<WebhookAppState>,
    Path(provider): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if provider != state.provider {
        tracing::debug!(provider = %provider, "webhook for unknown provider");
        return (
            StatusCode::NOT_FOUND,
            Json(WebhookResponse::new("unknown_provider", None)),
        )
            .into_response();
    }

    let signature = headers
        .get(&state.signature_header)
        .and_then(|v| v.to_str().ok());

    let verified = match state.processor.verify(&body, signature) {
        Ok(verified) => verified,
        Err(err) => return failure_response(&err, None),
    };

    let event_id = verified.event.id.clone();
    let provenance = Provenance {
        client_ip: client_ip(&headers, connect_info.as_ref()),
        request_id: headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    match state.processor.process_verified(verified, provenance).await {
        Ok(result) => result_response(&result, event_id),
        Err(err) => failure_response(&err, Some(event_id)),
    }
}

/// GET /health - Liveness
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn result_response(result: &WebhookResult, event_id: String) -> Response {
    (
        StatusCode::OK,
        Json(WebhookResponse::new(result.as_str(), Some(event_id))),
    )
        .into_response()
}

fn failure_response(err: &WebhookError, event_id: Option<String>) -> Response {
    let status = if err.is_retryable() { "failed" } else { "rejected" };
    let outcome = OutcomeReporter::failure(err, RetryOwner::Caller);
    (
        OutcomeReporter::status_code(&outcome),
        Json(WebhookResponse::new(status, event_id)),
    )
        .into_response()
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

// ════════════════════════════════════════════════════════════════════════════════
// Ledger admin
// ════════════════════════════════════════════════════════════════════════════════

/// GET /admin/webhooks - List ledger rows, newest first
pub async fn list_events(
    State(state): State<WebhookAppState>,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, AdminApiError> {
    let query = query
        .into_ledger_query()
        .map_err(|e| AdminApiError::BadRequest(e.to_string()))?;

    let rows = state.ledger.list(&query).await?;

    Ok(Json(LedgerEventListResponse {
        events: rows.iter().map(LedgerEventSummary::from).collect(),
        limit: query.limit,
        offset: query.offset,
    }))
}

/// GET /admin/webhooks/{event_id} - One ledger row with its payload
pub async fn get_event(
    State(state): State<WebhookAppState>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AdminApiError> {
    let row = state
        .ledger
        .find(&event_id)
        .await?
        .ok_or_else(|| AdminApiError::NotFound(format!("Event not found: {}", event_id)))?;

    Ok(Json(LedgerEventDetail::from(row)))
}

/// POST /admin/webhooks/{event_id}/replay - Reprocess a failed or stuck event
pub async fn replay_event(
    State(state): State<WebhookAppState>,
    Path(event_id): Path<String>,
) -> Result<Response, AdminApiError> {
    match state.processor.replay(&event_id).await {
        Ok(result) => Ok(result_response(&result, event_id)),
        Err(ReplayError::Webhook(err)) => Ok(failure_response(&err, Some(event_id))),
        Err(err) => Err(err.into()),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type for the admin endpoints.
#[derive(Debug)]
pub enum AdminApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DomainError> for AdminApiError {
    fn from(err: DomainError) -> Self {
        tracing::error!(error = %err, "ledger query failed");
        Self::Internal("storage unavailable".to_string())
    }
}

impl From<ReplayError> for AdminApiError {
    fn from(err: ReplayError) -> Self {
        match &err {
            ReplayError::NotFound(_) => Self::NotFound(err.to_string()),
            ReplayError::NotReplayable { .. } => Self::Conflict(err.to_string()),
            ReplayError::Webhook(inner) => Self::Internal(inner.ledger_message()),
        }
    }
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", m),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, "EVENT_NOT_FOUND", m),
            Self::Conflict(m) => (StatusCode::CONFLICT, "EVENT_NOT_REPLAYABLE", m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", m),
        };
        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}
