//! Webhook intake configuration

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Webhook intake, processing, and reconciliation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Provider name served at `POST /webhooks/{provider}`
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Header carrying the provider signature
    #[serde(default = "default_signature_header")]
    pub signature_header: String,

    /// Shared HMAC signing secret
    pub signing_secret: SecretString,

    /// Replay window for signed timestamps, in seconds
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: u64,

    /// How long a request waits for processing before answering `deferred`
    #[serde(default = "default_processing_deadline")]
    pub processing_deadline_ms: u64,

    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Age after which a `processing` row is considered abandoned
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_reconcile_batch_size")]
    pub reconcile_batch_size: i64,

    /// Attempts after which a retryable failure the engine owns stays `failed`
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Strip payloads of succeeded ledger rows after this many days; unset keeps them
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// Bearer token for the admin routes; unset disables them
    #[serde(default)]
    pub admin_token: Option<SecretString>,
}

impl WebhookConfig {
    pub fn processing_deadline(&self) -> Duration {
        Duration::from_millis(self.processing_deadline_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn stale_processing(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_processing_secs).unwrap_or(i64::MAX))
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }

    /// Validate webhook configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider.trim().is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK_PROVIDER"));
        }
        if self.signing_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("WEBHOOK_SIGNING_SECRET"));
        }
        if http::HeaderName::from_bytes(self.signature_header.as_bytes()).is_err() {
            return Err(ValidationError::InvalidSignatureHeader(
                self.signature_header.clone(),
            ));
        }
        if !(1..=3600).contains(&self.tolerance_secs) {
            return Err(ValidationError::InvalidTolerance);
        }
        if !(1..=10_000).contains(&self.processing_deadline_ms) {
            return Err(ValidationError::InvalidProcessingDeadline);
        }
        if !(1..=10 * 1024 * 1024).contains(&self.max_body_bytes) {
            return Err(ValidationError::InvalidBodyLimit);
        }
        if self.stale_processing_secs == 0
            || self.reconcile_interval_secs == 0
            || !(1..=1000).contains(&self.reconcile_batch_size)
            || !(1..=100).contains(&self.max_attempts)
        {
            return Err(ValidationError::InvalidReconcileSettings);
        }
        if let Some(token) = &self.admin_token {
            if token.expose_secret().len() < 16 {
                return Err(ValidationError::WeakAdminToken);
            }
        }
        Ok(())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            signature_header: default_signature_header(),
            signing_secret: SecretString::new(String::new()),
            tolerance_secs: default_tolerance(),
            processing_deadline_ms: default_processing_deadline(),
            max_body_bytes: default_max_body_bytes(),
            stale_processing_secs: default_stale_processing(),
            reconcile_interval_secs: default_reconcile_interval(),
            reconcile_batch_size: default_reconcile_batch_size(),
            max_attempts: default_max_attempts(),
            retention_days: None,
            admin_token: None,
        }
    }
}

fn default_provider() -> String {
    "stripe".to_string()
}

fn default_signature_header() -> String {
    "Stripe-Signature".to_string()
}

fn default_tolerance() -> u64 {
    300
}

fn default_processing_deadline() -> u64 {
    8000
}

fn default_max_body_bytes() -> usize {
    256 * 1024
}

fn default_stale_processing() -> u64 {
    600
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_reconcile_batch_size() -> i64 {
    50
}

fn default_max_attempts() -> i32 {
    5
}
