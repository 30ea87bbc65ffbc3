//! Recording domain action dispatcher.
//!
//! Keeps every accepted request in memory, deduplicated on the idempotency
//! key like the durable outbox. Can be switched into a failing mode or slowed
//! down to exercise retry and deadline paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{ActionRequest, DispatchError, DomainActionDispatcher};

#[derive(Default)]
pub struct RecordingActionDispatcher {
    applied: Mutex<Vec<ActionRequest>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher that sleeps before accepting each request.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// While set, every request is refused with `DispatchError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Accepted requests in arrival order, one per idempotency key.
    pub async fn requests(&self) -> Vec<ActionRequest> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl DomainActionDispatcher for RecordingActionDispatcher {
    async fn apply(&self, request: ActionRequest) -> Result<(), DispatchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable(
                "recording dispatcher set to fail".to_string(),
            ));
        }

        let mut applied = self.applied.lock().await;
        if applied
            .iter()
            .any(|existing| existing.idempotency_key == request.idempotency_key)
        {
            tracing::debug!(key = %request.idempotency_key, "duplicate domain action skipped");
            return Ok(());
        }
        applied.push(request);
        Ok(())
    }
}
