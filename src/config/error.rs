//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Signature tolerance must be between 1 and 3600 seconds")]
    InvalidTolerance,

    #[error("Processing deadline must be between 1 and 10000 milliseconds")]
    InvalidProcessingDeadline,

    #[error("Body limit must be between 1 byte and 10 MiB")]
    InvalidBodyLimit,

    #[error("Invalid signature header name: {0}")]
    InvalidSignatureHeader(String),

    #[error("Invalid reconciliation settings")]
    InvalidReconcileSettings,

    #[error("Admin token must be at least 16 characters")]
    WeakAdminToken,
}
