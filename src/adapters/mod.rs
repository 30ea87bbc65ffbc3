//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - Axum router for webhook intake and ledger admin
//! - `memory` - In-process stores for tests and local development
//! - `postgres` - sqlx-backed ledger, billing, and action outbox

pub mod http;
pub mod memory;
pub mod postgres;
