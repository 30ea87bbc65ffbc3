//! Outcome reporter - writes the terminal ledger state and picks the HTTP status.
//!
//! A retryable failure is only worth a `failed` row while the provider can
//! still redeliver. Once the provider has been answered 200 (a deferred
//! delivery, or any row reconciliation picked up) the row is requeued to
//! `received` instead, up to an attempts cap.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::ports::LedgerStore;

use super::errors::WebhookError;
use super::handlers::HandlerOutcome;
use super::ledger::Outcome;

/// Who retries a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOwner {
    /// The failure reaches whoever is waiting (a provider that redelivers
    /// on 5xx, or an operator replay) and they retry.
    Caller,
    /// The provider already has a 200.
    Engine { attempts: i32, max_attempts: i32 },
}

#[derive(Clone)]
pub struct OutcomeReporter {
    ledger: Arc<dyn LedgerStore>,
}

impl OutcomeReporter {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Ledger outcome for a handler result.
    pub fn outcome_of(result: &Result<HandlerOutcome, WebhookError>, owner: RetryOwner) -> Outcome {
        match result {
            Ok(handled) => Outcome::Succeeded {
                note: handled.note(),
            },
            Err(err) => Self::failure(err, owner),
        }
    }

    /// Ledger outcome for a failed event.
    pub fn failure(err: &WebhookError, owner: RetryOwner) -> Outcome {
        match owner {
            RetryOwner::Engine {
                attempts,
                max_attempts,
            } if err.is_retryable() && attempts < max_attempts => Outcome::Requeued {
                error_message: err.ledger_message(),
            },
            _ => Outcome::Failed {
                error_message: err.ledger_message(),
                retryable: err.is_retryable(),
            },
        }
    }

    /// HTTP status the provider should see for an outcome.
    ///
    /// Retryable failures answer 500 so the provider redelivers; permanent
    /// ones answer 400.
    pub fn status_code(outcome: &Outcome) -> StatusCode {
        match outcome {
            Outcome::Succeeded { .. } | Outcome::Requeued { .. } => StatusCode::OK,
            Outcome::Failed {
                retryable: true, ..
            } => StatusCode::INTERNAL_SERVER_ERROR,
            Outcome::Failed {
                retryable: false, ..
            } => StatusCode::BAD_REQUEST,
        }
    }

    /// Persists the outcome, retrying a failed write once.
    ///
    /// A row that is no longer `processing` was finalized or reclaimed by
    /// another worker; that is logged and not treated as an error.
    pub async fn finalize(
        &self,
        event_id: &str,
        outcome: &Outcome,
        processing_time_ms: i64,
    ) -> Result<(), WebhookError> {
        let mut last_error = None;
        for attempt in 1..=2 {
            match self
                .ledger
                .finalize(event_id, outcome, processing_time_ms)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::warn!(
                        event_id = %event_id,
                        status = %outcome.status(),
                        "ledger row no longer processing; outcome not recorded"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(event_id = %event_id, attempt, error = %e, "ledger finalize failed");
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.map(WebhookError::from).unwrap_or_else(|| {
            WebhookError::Storage("ledger finalize failed".to_string())
        });
        tracing::error!(
            event_id = %event_id,
            status = %outcome.status(),
            error = %err,
            "giving up on ledger finalize"
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryLedgerStore;
    use crate::domain::webhooks::{EventStatus, NewLedgerEntry, SignatureError};
    use crate::ports::DispatchError;

    fn dispatch_down() -> WebhookError {
        WebhookError::Dispatch(DispatchError::Unavailable("down".to_string()))
    }

    fn entry(event_id: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            event_id: event_id.to_string(),
            event_type: "payment.succeeded".to_string(),
            raw_payload: "{}".to_string(),
            client_ip: None,
            request_id: None,
        }
    }

    #[test]
    fn ignored_outcome_succeeds_with_note() {
        let outcome = OutcomeReporter::outcome_of(
            &Ok(HandlerOutcome::Ignored("unrecognized event type: x".to_string())),
            RetryOwner::Caller,
        );

        assert_eq!(
            outcome,
            Outcome::Succeeded {
                note: Some("unrecognized event type: x".to_string())
            }
        );
        assert_eq!(OutcomeReporter::status_code(&outcome), StatusCode::OK);
    }

    #[test]
    fn retryable_failure_answers_500() {
        let outcome = OutcomeReporter::outcome_of(&Err(dispatch_down()), RetryOwner::Caller);

        assert_eq!(
            OutcomeReporter::status_code(&outcome),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(matches!(
            outcome,
            Outcome::Failed { ref error_message, .. } if error_message == "domain action dispatch failed"
        ));
    }

    #[test]
    fn permanent_failure_answers_400() {
        let outcome = OutcomeReporter::outcome_of(
            &Err(WebhookError::MalformedPayload(
                "missing field: payment_id".to_string(),
            )),
            RetryOwner::Caller,
        );

        assert_eq!(OutcomeReporter::status_code(&outcome), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn signature_failure_answers_400() {
        let outcome = OutcomeReporter::failure(
            &WebhookError::from(SignatureError::MissingHeader),
            RetryOwner::Caller,
        );
        assert_eq!(OutcomeReporter::status_code(&outcome), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn engine_owned_failure_is_requeued_until_the_cap() {
        let requeued = OutcomeReporter::failure(
            &dispatch_down(),
            RetryOwner::Engine {
                attempts: 1,
                max_attempts: 5,
            },
        );
        assert_eq!(
            requeued,
            Outcome::Requeued {
                error_message: "domain action dispatch failed".to_string()
            }
        );
        assert_eq!(requeued.status(), EventStatus::Received);

        let exhausted = OutcomeReporter::failure(
            &dispatch_down(),
            RetryOwner::Engine {
                attempts: 5,
                max_attempts: 5,
            },
        );
        assert!(matches!(exhausted, Outcome::Failed { retryable: true, .. }));
    }

    #[test]
    fn engine_owned_permanent_failure_is_not_requeued() {
        let outcome = OutcomeReporter::failure(
            &WebhookError::MalformedPayload("missing field: id".to_string()),
            RetryOwner::Engine {
                attempts: 1,
                max_attempts: 5,
            },
        );
        assert!(matches!(outcome, Outcome::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn finalize_writes_terminal_state() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger.insert_if_absent(entry("evt_1")).await.unwrap();
        let reporter = OutcomeReporter::new(ledger.clone());

        reporter
            .finalize("evt_1", &Outcome::Succeeded { note: None }, 7)
            .await
            .unwrap();

        let row = ledger.find("evt_1").await.unwrap().unwrap();
        assert_eq!(row.status, EventStatus::Succeeded);
        assert_eq!(row.processing_time_ms, Some(7));
        assert!(row.processing_completed_at.is_some());
    }

    #[tokio::test]
    async fn finalize_of_already_finalized_row_is_not_an_error() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger.insert_if_absent(entry("evt_1")).await.unwrap();
        let reporter = OutcomeReporter::new(ledger.clone());
        reporter
            .finalize("evt_1", &Outcome::Succeeded { note: None }, 1)
            .await
            .unwrap();

        let second = reporter
            .finalize(
                "evt_1",
                &Outcome::Failed {
                    error_message: "late".to_string(),
                    retryable: true,
                },
                2,
            )
            .await;

        assert!(second.is_ok());
        let row = ledger.find("evt_1").await.unwrap().unwrap();
        assert_eq!(row.status, EventStatus::Succeeded);
    }

    #[tokio::test]
    async fn finalize_retries_once_then_gives_up() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger.insert_if_absent(entry("evt_1")).await.unwrap();
        ledger.fail_finalize(1);
        let reporter = OutcomeReporter::new(ledger.clone());

        reporter
            .finalize("evt_1", &Outcome::Succeeded { note: None }, 1)
            .await
            .unwrap();
        assert_eq!(
            ledger.find("evt_1").await.unwrap().unwrap().status,
            EventStatus::Succeeded
        );

        ledger.insert_if_absent(entry("evt_2")).await.unwrap();
        ledger.fail_finalize(2);
        let result = reporter
            .finalize("evt_2", &Outcome::Succeeded { note: None }, 1)
            .await;

        assert!(matches!(result, Err(WebhookError::Storage(_))));
        assert_eq!(
            ledger.find("evt_2").await.unwrap().unwrap().status,
            EventStatus::Processing
        );
    }
}
