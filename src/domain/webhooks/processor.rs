//! Webhook processor - Orchestrates verified, exactly-once event handling.
//!
//! ## Flow
//!
//! 1. Verify the signature and parse the body (no ledger write on failure)
//! 2. Claim the event in the ledger (`insert_if_absent`)
//! 3. Route, handle, and finalize on a detached task
//! 4. Wait for that task up to the processing deadline
//!
//! ## Race Condition Handling
//!
//! Concurrent deliveries of one event race on the ledger's unique key. The
//! loser sees a `processing` or `succeeded` row and answers
//! `AlreadyProcessed` without running handlers.
//!
//! Handling runs on its own task, so a dropped HTTP connection or an expired
//! deadline never interrupts a transition half way. The task still finalizes
//! the ledger row when it completes.
//!
//! ## Deferred Failures
//!
//! The task and the waiting request settle who answers the provider before
//! the row is finalized. If the request already answered `deferred`, the
//! provider will not redeliver, so a retryable failure requeues the row to
//! `received` for reconciliation instead of marking it `failed`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;

use crate::ports::{BillingStore, DomainActionDispatcher, LedgerStore};

use super::errors::{ReplayError, WebhookError};
use super::event::ProviderEvent;
use super::handlers::{HandlerOutcome, TransitionHandlers};
use super::ledger::{NewLedgerEntry, Outcome, ReclaimResult, WebhookEvent};
use super::reporter::{OutcomeReporter, RetryOwner};
use super::router::{EventRouter, Route};
use super::signature::{SignatureError, SignatureVerifier};

/// Result of processing a webhook. Every variant answers 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResult {
    /// Event was applied.
    Processed,
    /// Event was acknowledged without effect.
    Ignored(String),
    /// Another delivery owns or already finished this event.
    AlreadyProcessed,
    /// Deadline expired; processing continues in the background.
    Deferred,
}

impl WebhookResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookResult::Processed => "processed",
            WebhookResult::Ignored(_) => "ignored",
            WebhookResult::AlreadyProcessed => "duplicate",
            WebhookResult::Deferred => "deferred",
        }
    }
}

/// A delivery that passed signature verification.
#[derive(Debug, Clone)]
pub struct VerifiedEvent {
    pub event: ProviderEvent,
    /// The exact body that was signed.
    pub raw_payload: String,
}

const DEFAULT_MAX_ATTEMPTS: i32 = 5;

const WAITING: u8 = 0;
const ANSWERED: u8 = 1;
const DEFERRED: u8 = 2;

/// Settles whether a live request reports the outcome or answered `deferred`.
#[derive(Debug, Default)]
struct Handoff(AtomicU8);

impl Handoff {
    /// Called by the task before finalizing. False means the request
    /// already answered `deferred`.
    fn answer(&self) -> bool {
        self.0
            .compare_exchange(WAITING, ANSWERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by the request when the deadline expires. False means the
    /// task is already finalizing and its result should be awaited.
    fn defer(&self) -> bool {
        self.0
            .compare_exchange(WAITING, DEFERRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Who is waiting on a processing run.
enum Waiter {
    Request { handoff: Arc<Handoff>, attempts: i32 },
    Reconciliation { attempts: i32 },
    Operator,
}

/// Where a delivery came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub client_ip: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Clone)]
pub struct WebhookProcessor {
    verifier: SignatureVerifier,
    ledger: Arc<dyn LedgerStore>,
    handlers: TransitionHandlers,
    reporter: OutcomeReporter,
    deadline: Duration,
    max_attempts: i32,
}

impl WebhookProcessor {
    pub fn new(
        verifier: SignatureVerifier,
        ledger: Arc<dyn LedgerStore>,
        billing: Arc<dyn BillingStore>,
        actions: Arc<dyn DomainActionDispatcher>,
        deadline: Duration,
    ) -> Self {
        Self {
            verifier,
            reporter: OutcomeReporter::new(ledger.clone()),
            handlers: TransitionHandlers::new(billing, actions),
            ledger,
            deadline,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Caps engine retries of a row whose delivery was already answered.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Authenticates a delivery. Nothing is persisted.
    pub fn verify(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<VerifiedEvent, WebhookError> {
        let event = self
            .verifier
            .verify(raw_body, signature_header)
            .map_err(|e| {
                tracing::warn!(error = %e, "webhook signature rejected");
                e
            })?;
        let raw_payload = String::from_utf8(raw_body.to_vec())
            .map_err(|_| SignatureError::MalformedBody("body is not valid UTF-8".to_string()))?;
        Ok(VerifiedEvent { event, raw_payload })
    }

    /// Verifies and processes one delivery.
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        provenance: Provenance,
    ) -> Result<WebhookResult, WebhookError> {
        let verified = self.verify(raw_body, signature_header)?;
        self.process_verified(verified, provenance).await
    }

    /// Claims a verified event and processes it within the deadline.
    pub async fn process_verified(
        &self,
        verified: VerifiedEvent,
        provenance: Provenance,
    ) -> Result<WebhookResult, WebhookError> {
        let VerifiedEvent { event, raw_payload } = verified;
        let event_id = event.id.clone();

        let claim = self
            .ledger
            .insert_if_absent(NewLedgerEntry {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                raw_payload,
                client_ip: provenance.client_ip,
                request_id: provenance.request_id,
            })
            .await
            .map_err(|e| {
                tracing::warn!(event_id = %event_id, error = %e, "ledger claim failed");
                WebhookError::from(e)
            })?;

        if !claim.is_new {
            tracing::info!(
                event_id = %event_id,
                status = %claim.record.status,
                "duplicate delivery acknowledged"
            );
            return Ok(WebhookResult::AlreadyProcessed);
        }

        let handoff = Arc::new(Handoff::default());
        let waiter = Waiter::Request {
            handoff: handoff.clone(),
            attempts: claim.record.attempts,
        };
        let processor = self.clone();
        let started = Instant::now();
        let mut task = tokio::spawn(async move { processor.run(event, started, waiter).await });

        match tokio::time::timeout(self.deadline, &mut task).await {
            Ok(joined) => joined_result(&event_id, joined),
            Err(_) if handoff.defer() => {
                tracing::warn!(
                    event_id = %event_id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "processing deadline exceeded; continuing in background"
                );
                Ok(WebhookResult::Deferred)
            }
            Err(_) => joined_result(&event_id, task.await),
        }
    }

    /// Processes a row reconciliation already claimed, from its stored payload.
    ///
    /// The payload was verified at intake and is not verified again. Nobody
    /// is waiting on the result, so retryable failures are requeued until
    /// the attempts cap.
    pub async fn process_claimed(&self, record: WebhookEvent) -> Result<WebhookResult, WebhookError> {
        let waiter = Waiter::Reconciliation {
            attempts: record.attempts,
        };
        self.process_stored(record, waiter).await
    }

    /// Reclaims a `failed` or `received` row and processes it again.
    pub async fn replay(&self, event_id: &str) -> Result<WebhookResult, ReplayError> {
        match self.ledger.reclaim(event_id).await? {
            ReclaimResult::NotFound => Err(ReplayError::NotFound(event_id.to_string())),
            ReclaimResult::NotClaimable(status) => Err(ReplayError::NotReplayable {
                event_id: event_id.to_string(),
                status,
            }),
            ReclaimResult::Claimed(record) => {
                tracing::info!(event_id = %event_id, attempts = record.attempts, "replaying event");
                Ok(self.process_stored(record, Waiter::Operator).await?)
            }
        }
    }

    async fn process_stored(
        &self,
        record: WebhookEvent,
        waiter: Waiter,
    ) -> Result<WebhookResult, WebhookError> {
        let started = Instant::now();
        match serde_json::from_str::<ProviderEvent>(&record.raw_payload) {
            Ok(event) => self.run(event, started, waiter).await,
            Err(e) => {
                let err = WebhookError::MalformedPayload(format!("stored payload: {}", e));
                let outcome = Outcome::Failed {
                    error_message: err.ledger_message(),
                    retryable: false,
                };
                self.reporter
                    .finalize(&record.event_id, &outcome, elapsed_ms(started))
                    .await?;
                Err(err)
            }
        }
    }

    fn retry_owner(&self, waiter: Waiter) -> RetryOwner {
        let engine = |attempts| RetryOwner::Engine {
            attempts,
            max_attempts: self.max_attempts,
        };
        match waiter {
            Waiter::Request { handoff, .. } if handoff.answer() => RetryOwner::Caller,
            Waiter::Request { attempts, .. } | Waiter::Reconciliation { attempts } => engine(attempts),
            Waiter::Operator => RetryOwner::Caller,
        }
    }

    async fn run(
        &self,
        event: ProviderEvent,
        started: Instant,
        waiter: Waiter,
    ) -> Result<WebhookResult, WebhookError> {
        let event_type = event.parsed_type();
        let result = match EventRouter::route(&event_type) {
            Route::Handle(handler) => self.handlers.handle(handler, &event).await,
            Route::Ignore(reason) => Ok(HandlerOutcome::Ignored(reason)),
        };

        let outcome = OutcomeReporter::outcome_of(&result, self.retry_owner(waiter));
        let elapsed = elapsed_ms(started);
        self.reporter.finalize(&event.id, &outcome, elapsed).await?;
        if let Outcome::Requeued { .. } = outcome {
            tracing::info!(event_id = %event.id, "failed event requeued for reconciliation");
        }

        match result {
            Ok(HandlerOutcome::Ignored(reason)) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    elapsed_ms = elapsed,
                    reason = %reason,
                    "event acknowledged without effect"
                );
                Ok(WebhookResult::Ignored(reason))
            }
            Ok(_) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event_type,
                    elapsed_ms = elapsed,
                    "event processed"
                );
                Ok(WebhookResult::Processed)
            }
            Err(err) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event_type,
                    elapsed_ms = elapsed,
                    retryable = err.is_retryable(),
                    error = %err,
                    "event processing failed"
                );
                Err(err)
            }
        }
    }
}

fn joined_result(
    event_id: &str,
    joined: Result<Result<WebhookResult, WebhookError>, JoinError>,
) -> Result<WebhookResult, WebhookError> {
    joined.unwrap_or_else(|join_error| {
        tracing::error!(event_id = %event_id, error = %join_error, "processing task aborted");
        Err(WebhookError::Storage(format!(
            "processing task aborted: {}",
            join_error
        )))
    })
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
