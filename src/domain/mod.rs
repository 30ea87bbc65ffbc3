//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (errors, state machine trait)
//! - `billing` - Payment and subscription records and their lifecycles
//! - `webhooks` - Provider event verification, idempotent processing, and handlers

pub mod billing;
pub mod foundation;
pub mod webhooks;
