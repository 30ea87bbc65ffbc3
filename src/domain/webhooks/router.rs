//! Event router - maps event types to state transition handlers.

use super::event::EventType;

/// State transition handler selected for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
}

/// Routing decision for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Handle(Handler),
    /// Acknowledge without effect; the string is recorded as the ledger note.
    Ignore(String),
}

/// Stateless dispatch table over the closed event type set.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventRouter;

impl EventRouter {
    pub fn route(event_type: &EventType) -> Route {
        match event_type {
            EventType::PaymentSucceeded => Route::Handle(Handler::PaymentSucceeded),
            EventType::PaymentFailed => Route::Handle(Handler::PaymentFailed),
            EventType::SubscriptionCreated => Route::Handle(Handler::SubscriptionCreated),
            EventType::SubscriptionUpdated => Route::Handle(Handler::SubscriptionUpdated),
            EventType::SubscriptionDeleted => Route::Handle(Handler::SubscriptionDeleted),
            EventType::InvoicePaid => Route::Handle(Handler::InvoicePaid),
            EventType::InvoicePaymentFailed => Route::Handle(Handler::InvoicePaymentFailed),
            EventType::Unrecognized(raw) => {
                Route::Ignore(format!("unrecognized event type: {}", raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_type_has_a_handler() {
        let known = [
            "payment.succeeded",
            "payment.failed",
            "subscription.created",
            "subscription.updated",
            "subscription.deleted",
            "invoice.paid",
            "invoice.payment_failed",
        ];
        for name in known {
            assert!(
                matches!(EventRouter::route(&EventType::parse(name)), Route::Handle(_)),
                "{} should route to a handler",
                name
            );
        }
    }

    #[test]
    fn aliases_reach_the_same_handler() {
        assert_eq!(
            EventRouter::route(&EventType::parse("customer.subscription.updated")),
            Route::Handle(Handler::SubscriptionUpdated)
        );
    }

    #[test]
    fn unrecognized_type_is_ignored_with_note() {
        let route = EventRouter::route(&EventType::parse("customer.created"));
        assert_eq!(
            route,
            Route::Ignore("unrecognized event type: customer.created".to_string())
        );
    }
}
