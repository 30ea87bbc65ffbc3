//! ReconciliationWorker - Background recovery of abandoned ledger rows.
//!
//! Intake processes each event on a detached task. If the process dies while
//! a row is `processing`, nothing else would ever finish it: the provider's
//! redelivery sees `processing` and is acknowledged as a duplicate. This
//! worker closes that gap.
//!
//! ## Each Pass
//!
//! 1. Claim `processing` rows older than the stale cutoff, plus `received` rows
//! 2. Re-run them from the stored payload (verified at intake, not re-verified)
//! 3. Strip payloads of old `succeeded` rows when a retention period is configured
//!
//! The provider has already been answered for every row claimed here, so a
//! retryable failure goes back to `received` for the next pass until the
//! processor's attempts cap. `failed` rows are left alone; provider
//! redelivery or an operator replay owns their retry. Rows are never deleted.
//!
//! ## Graceful Shutdown
//!
//! The worker listens on a watch channel and exits after the current pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time;

use crate::config::WebhookConfig;
use crate::domain::foundation::DomainError;
use crate::domain::webhooks::WebhookProcessor;
use crate::ports::LedgerStore;

/// Configuration for the ReconciliationWorker.
#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How often to run a pass.
    pub interval: Duration,

    /// `processing` rows started before `now - stale_after` are reclaimed.
    pub stale_after: chrono::Duration,

    /// Maximum rows reclaimed per pass.
    pub batch_size: i64,

    /// Strip payloads of `succeeded` rows older than this, if set.
    pub retention: Option<chrono::Duration>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: chrono::Duration::minutes(10),
            batch_size: 50,
            retention: None,
        }
    }
}

impl From<&WebhookConfig> for ReconciliationConfig {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            interval: config.reconcile_interval(),
            stale_after: config.stale_processing(),
            batch_size: config.reconcile_batch_size,
            retention: config.retention(),
        }
    }
}

impl ReconciliationConfig {
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub reclaimed: usize,
    pub processed: usize,
    pub failed: usize,
    pub compacted: u64,
}

pub struct ReconciliationWorker {
    ledger: Arc<dyn LedgerStore>,
    processor: WebhookProcessor,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        processor: WebhookProcessor,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            ledger,
            processor,
            config,
        }
    }

    /// Run passes until the shutdown signal is received.
    ///
    /// A failing pass is logged and the loop continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("reconciliation worker stopping");
                        return;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "reconciliation pass failed");
                    }
                }
            }
        }
    }

    /// Run exactly one pass.
    pub async fn run_once(&self) -> Result<ReconciliationReport, DomainError> {
        let cutoff = Utc::now() - self.config.stale_after;
        let rows = self
            .ledger
            .claim_stale(cutoff, self.config.batch_size)
            .await?;

        let mut report = ReconciliationReport {
            reclaimed: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let event_id = row.event_id.clone();
            let attempts = row.attempts;
            match self.processor.process_claimed(row).await {
                Ok(result) => {
                    tracing::info!(
                        event_id = %event_id,
                        attempts,
                        result = result.as_str(),
                        "reconciled abandoned event"
                    );
                    report.processed += 1;
                }
                Err(e) => {
                    tracing::warn!(event_id = %event_id, attempts, error = %e, "reconciliation attempt failed");
                    report.failed += 1;
                }
            }
        }

        if let Some(retention) = self.config.retention {
            report.compacted = self
                .ledger
                .compact_succeeded_before(Utc::now() - retention)
                .await?;
            if report.compacted > 0 {
                tracing::info!(compacted = report.compacted, "compacted expired ledger payloads");
            }
        }

        Ok(report)
    }
}
