//! Payment Event Engine - Exactly-once processing of payment provider webhooks.
//!
//! Verifies provider signatures, records every event in a ledger that doubles
//! as the idempotency guard, and applies payment and subscription transitions
//! that stay correct under duplicate, reordered, and concurrent delivery.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
