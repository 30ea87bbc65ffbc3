//! Webhook signature verification.
//!
//! Authenticates provider deliveries with HMAC-SHA256 over
//! `"{timestamp}.{raw_body}"` and rejects deliveries whose timestamp lies
//! outside the tolerance window. Nothing about an unverified body is trusted,
//! including its event id.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::event::ProviderEvent;

/// Default replay window in seconds.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Reasons a delivery fails authentication. All of them answer 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,

    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("Timestamp outside tolerance ({age_secs}s)")]
    TimestampOutsideTolerance { age_secs: i64 },

    #[error("No matching signature")]
    NoMatchingSignature,

    #[error("Malformed body: {0}")]
    MalformedBody(String),
}

/// Parsed components of the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp the provider signed.
    pub timestamp: i64,
    /// Every `v1` candidate. More than one appears while secrets rotate.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<unix>,v1=<hex>[,v1=<hex>...][,v0=<hex>]`.
    ///
    /// `v0` and unknown keys are skipped. A header needs a timestamp and at
    /// least one `v1` entry.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| SignatureError::MalformedHeader("expected key=value".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        SignatureError::MalformedHeader("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        SignatureError::MalformedHeader("invalid v1 signature hex".to_string())
                    })?);
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| SignatureError::MalformedHeader("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(SignatureError::MalformedHeader(
                "missing v1 signature".to_string(),
            ));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifies provider deliveries against one signing secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance_secs: u64,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString, tolerance_secs: u64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verifies against the current clock.
    pub fn verify(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ProviderEvent, SignatureError> {
        self.verify_at(raw_body, signature_header, chrono::Utc::now().timestamp())
    }

    /// Verifies against an explicit clock reading.
    pub fn verify_at(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<ProviderEvent, SignatureError> {
        verify_at(
            raw_body,
            signature_header,
            self.secret.expose_secret(),
            self.tolerance_secs,
            now,
        )
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

/// Verifies a delivery and parses its body.
pub fn verify(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    tolerance_secs: u64,
) -> Result<ProviderEvent, SignatureError> {
    verify_at(
        raw_body,
        signature_header,
        secret,
        tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
}

/// [`verify`] with the clock supplied by the caller.
pub fn verify_at(
    raw_body: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<ProviderEvent, SignatureError> {
    let header = match signature_header.map(str::trim) {
        Some(h) if !h.is_empty() => SignatureHeader::parse(h)?,
        _ => return Err(SignatureError::MissingHeader),
    };

    let age_secs = now.saturating_sub(header.timestamp);
    if age_secs.unsigned_abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutsideTolerance { age_secs });
    }

    let expected = compute_signature(secret, header.timestamp, raw_body)?;
    let matched = header
        .v1_signatures
        .iter()
        .fold(false, |found, candidate| found | constant_time_compare(&expected, candidate));
    if !matched {
        return Err(SignatureError::NoMatchingSignature);
    }

    let event: ProviderEvent = serde_json::from_slice(raw_body)
        .map_err(|e| SignatureError::MalformedBody(e.to_string()))?;
    if event.id.is_empty() {
        return Err(SignatureError::MalformedBody("empty event id".to_string()));
    }

    Ok(event)
}

/// Builds a header value signing `raw_body` at `timestamp`.
///
/// Used by replay tooling and tests to produce deliveries the verifier accepts.
pub fn signature_header(secret: &str, timestamp: i64, raw_body: &[u8]) -> String {
    match compute_signature(secret, timestamp, raw_body) {
        Ok(signature) => format!("t={},v1={}", timestamp, hex::encode(signature)),
        Err(_) => format!("t={}", timestamp),
    }
}

fn compute_signature(
    secret: &str,
    timestamp: i64,
    raw_body: &[u8],
) -> Result<Vec<u8>, SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::NoMatchingSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
