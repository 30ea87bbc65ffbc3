//! In-memory adapters for tests and local development.

mod action_dispatcher;
mod billing_store;
mod ledger_store;

pub use action_dispatcher::RecordingActionDispatcher;
pub use billing_store::InMemoryBillingStore;
pub use ledger_store::InMemoryLedgerStore;
