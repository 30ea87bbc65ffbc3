//! Billing domain module.
//!
//! Payment and subscription records as the webhook engine sees them. The
//! billing subsystem owns their full lifecycle; the engine only performs the
//! transitions defined here.

mod payment;
mod subscription;

pub use payment::{PaymentRecord, PaymentStatus, PaymentType};
pub use subscription::{SubscriptionChanges, SubscriptionRecord, SubscriptionStatus};
