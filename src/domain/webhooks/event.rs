//! Provider webhook event types.
//!
//! Defines the envelope every provider notification arrives in, the closed
//! set of event types the engine acts on, and typed views over the
//! polymorphic `data.object` payload. Only fields the handlers read are
//! captured; everything else in the provider schema is ignored.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::WebhookError;

/// Provider webhook event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    /// Provider-assigned identifier, stable across redeliveries.
    pub id: String,

    /// Raw event type string (e.g. `payment.succeeded`).
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the provider created the event (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,

    /// Object that triggered the event.
    pub data: EventData,

    /// Whether this is a live mode event (vs test mode).
    #[serde(default)]
    pub livemode: bool,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventData {
    /// The object that triggered the event (shape depends on event type).
    pub object: serde_json::Value,

    /// Previous values for updated attributes (update events only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

impl ProviderEvent {
    /// Parses the event type into the closed set the router understands.
    pub fn parsed_type(&self) -> EventType {
        EventType::parse(&self.event_type)
    }

    /// Deserializes `data.object` as the given typed view.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, WebhookError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            WebhookError::MalformedPayload(format!("{} object: {}", self.event_type, e))
        })
    }
}

/// Event types the engine applies to billing state.
///
/// Anything else the provider sends lands in `Unrecognized` and is
/// acknowledged without effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    Unrecognized(String),
}

impl EventType {
    /// Parses a wire name. Provider-native aliases map onto the same variant.
    pub fn parse(s: &str) -> Self {
        match s {
            "payment.succeeded" | "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment.failed" | "payment_intent.payment_failed" => Self::PaymentFailed,
            "subscription.created" | "customer.subscription.created" => Self::SubscriptionCreated,
            "subscription.updated" | "customer.subscription.updated" => Self::SubscriptionUpdated,
            "subscription.deleted" | "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentFailed => "payment.failed",
            Self::SubscriptionCreated => "subscription.created",
            Self::SubscriptionUpdated => "subscription.updated",
            Self::SubscriptionDeleted => "subscription.deleted",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Typed Object Views
// ════════════════════════════════════════════════════════════════════════════════

/// `data.object` of payment events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentObject {
    payment_id: Option<String>,
    id: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub failure_message: Option<String>,
}

impl PaymentObject {
    /// Payment reference, taken from `payment_id` or the object's own `id`.
    pub fn payment_id(&self) -> Result<&str, WebhookError> {
        non_empty(self.payment_id.as_deref().or(self.id.as_deref()), "payment_id")
    }
}

/// `data.object` of subscription events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionObject {
    subscription_id: Option<String>,
    id: Option<String>,
    user_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    pub status: Option<String>,
    pub plan: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub cancel_at_period_end: Option<bool>,
    pub version: Option<i64>,
    pub updated_at: Option<i64>,
}

impl SubscriptionObject {
    pub fn subscription_id(&self) -> Result<&str, WebhookError> {
        non_empty(
            self.subscription_id.as_deref().or(self.id.as_deref()),
            "subscription_id",
        )
    }

    /// Owner, from `user_id` or `metadata.user_id`.
    pub fn user_id(&self) -> Result<&str, WebhookError> {
        non_empty(
            self.user_id
                .as_deref()
                .or_else(|| self.metadata.get("user_id").map(String::as_str)),
            "user_id",
        )
    }

    /// Ordering key for last-writer-wins: `version`, else `updated_at`.
    pub fn ordering_version(&self) -> Option<i64> {
        self.version.or(self.updated_at)
    }
}

/// `data.object` of invoice events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceObject {
    invoice_id: Option<String>,
    id: Option<String>,
    subscription_id: Option<String>,
    subscription: Option<String>,
    pub attempt_count: Option<u32>,
    pub next_payment_attempt: Option<i64>,
    pub amount_due: Option<i64>,
    pub period_start: Option<i64>,
    pub period_end: Option<i64>,
}

impl InvoiceObject {
    pub fn invoice_id(&self) -> Option<&str> {
        self.invoice_id.as_deref().or(self.id.as_deref())
    }

    /// Subscription the invoice bills, if any. One-off invoices have none.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription_id
            .as_deref()
            .or(self.subscription.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn non_empty<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, WebhookError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WebhookError::MalformedPayload(format!("missing field: {}", field))),
    }
}

/// Converts a provider Unix timestamp.
pub fn unix_to_datetime(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| Utc.timestamp_opt(s, 0).single())
}

/// Builder for creating test ProviderEvent instances.
#[cfg(test)]
pub struct ProviderEventBuilder {
    id: String,
    event_type: String,
    object: serde_json::Value,
}

#[cfg(test)]
impl ProviderEventBuilder {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            object: serde_json::json!({}),
        }
    }

    pub fn object(mut self, object: serde_json::Value) -> Self {
        self.object = object;
        self
    }

    pub fn build(self) -> ProviderEvent {
        ProviderEvent {
            id: self.id,
            event_type: self.event_type,
            created: Some(Utc::now().timestamp()),
            data: EventData {
                object: self.object,
                previous_attributes: None,
            },
            livemode: false,
        }
    }
}
