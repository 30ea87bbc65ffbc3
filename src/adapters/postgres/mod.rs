//! PostgreSQL adapters - Database implementations of the storage ports.
//!
//! - `PostgresLedgerStore` - Event ledger and idempotency guard
//! - `PostgresBillingStore` - Payments and subscriptions with conditional writes
//! - `PostgresActionOutbox` - Durable hand-off of domain actions

mod action_outbox;
mod billing_store;
mod ledger_store;

pub use action_outbox::PostgresActionOutbox;
pub use billing_store::PostgresBillingStore;
pub use ledger_store::PostgresLedgerStore;
