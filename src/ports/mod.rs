//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the webhook domain and the outside world. Adapters implement these ports.
//!
//! - `LedgerStore` - Event ledger and idempotency guard
//! - `BillingStore` - Payment and subscription records
//! - `DomainActionDispatcher` - Side effects handed to the billing subsystem

mod action_dispatcher;
mod billing_store;
mod ledger_store;

pub use action_dispatcher::{
    ActionRequest, DispatchError, DomainAction, DomainActionDispatcher, UserNotice,
};
pub use billing_store::BillingStore;
pub use ledger_store::LedgerStore;
