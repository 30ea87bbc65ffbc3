//! HTTP adapter for webhook intake and ledger administration.
//!
//! - `POST /webhooks/{provider}` - Verified provider deliveries
//! - `GET /health` - Liveness
//! - `GET /admin/webhooks` - List ledger rows
//! - `GET /admin/webhooks/{event_id}` - Inspect one row
//! - `POST /admin/webhooks/{event_id}/replay` - Reprocess a row

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{AdminApiError, WebhookAppState};
pub use routes::webhook_router;
