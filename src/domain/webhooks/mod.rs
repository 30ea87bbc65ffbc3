//! Webhooks domain module.
//!
//! Turns authenticated provider notifications into exactly-once billing
//! state transitions.
//!
//! # Module Structure
//!
//! - `signature` - HMAC-SHA256 header verification
//! - `event` - Provider event envelope and typed payload views
//! - `ledger` - Ledger row, claim, and outcome types
//! - `router` - Event type to handler mapping
//! - `handlers` - State transition handlers
//! - `reporter` - Ledger finalize and HTTP status mapping
//! - `processor` - Orchestration with the idempotency guard and deadline

mod errors;
mod event;
mod handlers;
mod ledger;
mod processor;
mod reporter;
mod router;
pub mod signature;

pub use errors::{ReplayError, WebhookError};
pub use event::{EventData, EventType, InvoiceObject, PaymentObject, ProviderEvent, SubscriptionObject};
pub use handlers::{HandlerOutcome, TransitionHandlers};
pub use ledger::{
    EventStatus, LedgerClaim, LedgerQuery, NewLedgerEntry, Outcome, ReclaimResult, WebhookEvent,
};
pub use processor::{Provenance, VerifiedEvent, WebhookProcessor, WebhookResult};
pub use reporter::{OutcomeReporter, RetryOwner};
pub use router::{EventRouter, Handler, Route};
pub use signature::{SignatureError, SignatureHeader, SignatureVerifier};
