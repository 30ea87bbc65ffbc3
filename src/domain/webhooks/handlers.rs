//! State transition handlers.
//!
//! Each handler reads its precondition record, performs one conditional
//! write, then hands the side effect to the dispatcher under an idempotency
//! key derived from the record or the event, never from the local revision.
//! Redeliveries that find the record already in the target state re-issue
//! the side effect with the same key, so a dispatch failure after a committed
//! write converges on the next delivery.

use std::sync::Arc;

use crate::domain::billing::{
    PaymentRecord, PaymentStatus, SubscriptionChanges, SubscriptionRecord, SubscriptionStatus,
};
use crate::ports::{ActionRequest, BillingStore, DomainAction, DomainActionDispatcher, UserNotice};

use super::errors::WebhookError;
use super::event::{
    unix_to_datetime, InvoiceObject, PaymentObject, ProviderEvent, SubscriptionObject,
};
use super::router::Handler;

/// What a handler did with an event it did not reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Transition written and side effect dispatched.
    Applied,
    /// Record was already in the target state; side effect re-issued.
    AlreadyApplied,
    /// Acknowledged without effect, for the given reason.
    Ignored(String),
}

impl HandlerOutcome {
    /// Ledger note for the outcome, if any.
    pub fn note(&self) -> Option<String> {
        match self {
            HandlerOutcome::Applied => None,
            HandlerOutcome::AlreadyApplied => Some("already applied".to_string()),
            HandlerOutcome::Ignored(reason) => Some(reason.clone()),
        }
    }
}

/// Runs the handler the router selected.
#[derive(Clone)]
pub struct TransitionHandlers {
    billing: Arc<dyn BillingStore>,
    actions: Arc<dyn DomainActionDispatcher>,
}

impl TransitionHandlers {
    pub fn new(billing: Arc<dyn BillingStore>, actions: Arc<dyn DomainActionDispatcher>) -> Self {
        Self { billing, actions }
    }

    pub async fn handle(
        &self,
        handler: Handler,
        event: &ProviderEvent,
    ) -> Result<HandlerOutcome, WebhookError> {
        match handler {
            Handler::PaymentSucceeded => self.payment_succeeded(event).await,
            Handler::PaymentFailed => self.payment_failed(event).await,
            Handler::SubscriptionCreated => self.subscription_created(event).await,
            Handler::SubscriptionUpdated => self.subscription_updated(event).await,
            Handler::SubscriptionDeleted => self.subscription_deleted(event).await,
            Handler::InvoicePaid => self.invoice_paid(event).await,
            Handler::InvoicePaymentFailed => self.invoice_payment_failed(event).await,
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Payments
    // ════════════════════════════════════════════════════════════════════════

    async fn payment_succeeded(&self, event: &ProviderEvent) -> Result<HandlerOutcome, WebhookError> {
        let object: PaymentObject = event.object()?;
        let payment = self.load_payment(object.payment_id()?).await?;

        let grant = |p: &PaymentRecord| {
            (
                format!("grant_credits:{}", p.payment_id),
                DomainAction::GrantCredits {
                    user_id: p.user_id.clone(),
                    payment_id: p.payment_id.clone(),
                    amount: p.amount,
                    currency: p.currency.clone(),
                },
            )
        };

        match payment.status {
            PaymentStatus::Succeeded => {
                let (key, action) = grant(&payment);
                self.dispatch(event, key, action).await?;
                Ok(HandlerOutcome::AlreadyApplied)
            }
            PaymentStatus::Failed => Ok(HandlerOutcome::Ignored(format!(
                "payment {} already failed",
                payment.payment_id
            ))),
            PaymentStatus::Pending => {
                self.transition_payment(&payment, PaymentStatus::Succeeded)
                    .await?;
                let (key, action) = grant(&payment);
                self.dispatch(event, key, action).await?;
                Ok(HandlerOutcome::Applied)
            }
        }
    }

    async fn payment_failed(&self, event: &ProviderEvent) -> Result<HandlerOutcome, WebhookError> {
        let object: PaymentObject = event.object()?;
        let payment = self.load_payment(object.payment_id()?).await?;

        let key = format!("notify_payment_failed:{}", payment.payment_id);
        let notify = DomainAction::NotifyUser {
            user_id: payment.user_id.clone(),
            notice: UserNotice::PaymentFailed {
                payment_id: payment.payment_id.clone(),
                reason: object.failure_message.clone(),
            },
        };

        match payment.status {
            PaymentStatus::Failed => {
                self.dispatch(event, key, notify).await?;
                Ok(HandlerOutcome::AlreadyApplied)
            }
            PaymentStatus::Succeeded => Ok(HandlerOutcome::Ignored(format!(
                "payment {} already succeeded",
                payment.payment_id
            ))),
            PaymentStatus::Pending => {
                self.transition_payment(&payment, PaymentStatus::Failed)
                    .await?;
                self.dispatch(event, key, notify).await?;
                Ok(HandlerOutcome::Applied)
            }
        }
    }

    async fn load_payment(&self, payment_id: &str) -> Result<PaymentRecord, WebhookError> {
        self.billing
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| WebhookError::PreconditionNotMet(format!("payment {} not found", payment_id)))
    }

    async fn transition_payment(
        &self,
        payment: &PaymentRecord,
        next: PaymentStatus,
    ) -> Result<(), WebhookError> {
        let applied = self
            .billing
            .transition_payment(&payment.payment_id, payment.status, next)
            .await?;
        if !applied {
            return Err(WebhookError::PreconditionNotMet(format!(
                "concurrent update on payment {}",
                payment.payment_id
            )));
        }
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // Subscriptions
    // ════════════════════════════════════════════════════════════════════════

    async fn subscription_created(
        &self,
        event: &ProviderEvent,
    ) -> Result<HandlerOutcome, WebhookError> {
        let object: SubscriptionObject = event.object()?;
        let subscription_id = object.subscription_id()?;
        let user_id = object.user_id()?;

        let record =
            SubscriptionRecord::activated(subscription_id, user_id, &subscription_changes(&object));
        let key = format!("activate_plan:{}:created", subscription_id);

        if self.billing.insert_subscription(&record).await? {
            self.dispatch(event, key, activate_plan(&record)).await?;
            return Ok(HandlerOutcome::Applied);
        }

        // Re-issue only while the plan is still live; a later cancel wins.
        if let Some(existing) = self.billing.find_subscription(subscription_id).await? {
            if existing.status == SubscriptionStatus::Active {
                self.dispatch(event, key, activate_plan(&existing)).await?;
            }
        }
        Ok(HandlerOutcome::Ignored(format!(
            "subscription {} already exists",
            subscription_id
        )))
    }

    async fn subscription_updated(
        &self,
        event: &ProviderEvent,
    ) -> Result<HandlerOutcome, WebhookError> {
        let object: SubscriptionObject = event.object()?;
        let current = self.load_subscription(object.subscription_id()?).await?;
        let changes = subscription_changes(&object);
        let incoming = object.ordering_version();

        // The stored state is this event's own write.
        let redelivered = match incoming {
            Some(version) => current.source_version == Some(version),
            None => true,
        } && current.reflects(&changes);
        if redelivered {
            if let Some(action) = standing_effect(&current) {
                let key = update_key(&action, &current, incoming, event);
                self.dispatch(event, key, action).await?;
            }
            return Ok(HandlerOutcome::AlreadyApplied);
        }

        if current.status == SubscriptionStatus::Canceled {
            return Ok(HandlerOutcome::Ignored(format!(
                "subscription {} is canceled",
                current.subscription_id
            )));
        }

        if current.is_stale(incoming) {
            return Ok(HandlerOutcome::Ignored(format!(
                "stale update: version {} <= {}",
                incoming.unwrap_or_default(),
                current.source_version.unwrap_or_default()
            )));
        }

        let updated = current.merged(&changes);
        self.write_subscription(&updated, current.revision).await?;

        if let Some(action) = status_effect(&current, &updated) {
            let key = update_key(&action, &updated, incoming, event);
            self.dispatch(event, key, action).await?;
        }
        Ok(HandlerOutcome::Applied)
    }

    async fn subscription_deleted(
        &self,
        event: &ProviderEvent,
    ) -> Result<HandlerOutcome, WebhookError> {
        let object: SubscriptionObject = event.object()?;
        let current = self.load_subscription(object.subscription_id()?).await?;
        let key = format!("revoke_plan:{}:canceled", current.subscription_id);

        if current.status == SubscriptionStatus::Canceled {
            self.dispatch(event, key, revoke_plan(&current)).await?;
            return Ok(HandlerOutcome::AlreadyApplied);
        }

        let updated = current.merged(&SubscriptionChanges {
            status: Some(SubscriptionStatus::Canceled),
            current_period_end: unix_to_datetime(object.current_period_end),
            source_version: object.ordering_version(),
            ..Default::default()
        });
        self.write_subscription(&updated, current.revision).await?;
        self.dispatch(event, key, revoke_plan(&updated)).await?;
        Ok(HandlerOutcome::Applied)
    }

    // ════════════════════════════════════════════════════════════════════════
    // Invoices
    // ════════════════════════════════════════════════════════════════════════

    async fn invoice_payment_failed(
        &self,
        event: &ProviderEvent,
    ) -> Result<HandlerOutcome, WebhookError> {
        let invoice: InvoiceObject = event.object()?;
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(HandlerOutcome::Ignored(
                "invoice has no subscription".to_string(),
            ));
        };
        let current = self.load_subscription(subscription_id).await?;

        let record = match current.status {
            SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid => {
                return Ok(HandlerOutcome::Ignored(format!(
                    "subscription {} is {}",
                    subscription_id,
                    current.status.as_str()
                )));
            }
            SubscriptionStatus::PastDue => current,
            SubscriptionStatus::Active => {
                let updated = current.merged(&SubscriptionChanges {
                    status: Some(SubscriptionStatus::PastDue),
                    ..Default::default()
                });
                self.write_subscription(&updated, current.revision).await?;
                updated
            }
        };

        let attempt = invoice.attempt_count;
        let key = format!(
            "dunning:{}:{}:{}",
            subscription_id,
            invoice.invoice_id().unwrap_or(&event.id),
            attempt.unwrap_or(0)
        );
        let notify = DomainAction::NotifyUser {
            user_id: record.user_id.clone(),
            notice: UserNotice::Dunning {
                subscription_id: record.subscription_id.clone(),
                attempt_count: attempt,
                next_attempt: unix_to_datetime(invoice.next_payment_attempt),
            },
        };
        self.dispatch(event, key, notify).await?;
        Ok(HandlerOutcome::Applied)
    }

    async fn invoice_paid(&self, event: &ProviderEvent) -> Result<HandlerOutcome, WebhookError> {
        let invoice: InvoiceObject = event.object()?;
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(HandlerOutcome::Ignored(
                "invoice has no subscription".to_string(),
            ));
        };
        let current = self.load_subscription(subscription_id).await?;

        let period = SubscriptionChanges {
            current_period_start: unix_to_datetime(invoice.period_start),
            current_period_end: unix_to_datetime(invoice.period_end),
            ..Default::default()
        };
        let key = format!(
            "activate_plan:{}:invoice:{}",
            subscription_id,
            invoice.invoice_id().unwrap_or(&event.id)
        );

        match current.status {
            SubscriptionStatus::Canceled => Ok(HandlerOutcome::Ignored(format!(
                "subscription {} is canceled",
                subscription_id
            ))),
            SubscriptionStatus::Active => {
                let extends = matches!(
                    (period.current_period_end, current.current_period_end),
                    (Some(new_end), Some(old_end)) if new_end > old_end
                ) || (period.current_period_end.is_some()
                    && current.current_period_end.is_none());
                if !extends {
                    // Same period as stored: this invoice's recovery may be
                    // committed with its activation still undispatched.
                    let current_invoice = period.current_period_end.is_none()
                        || period.current_period_end == current.current_period_end;
                    if current_invoice {
                        self.dispatch(event, key, activate_plan(&current)).await?;
                        return Ok(HandlerOutcome::AlreadyApplied);
                    }
                    return Ok(HandlerOutcome::Ignored(format!(
                        "subscription {} already active",
                        subscription_id
                    )));
                }
                let updated = current.merged(&period);
                self.write_subscription(&updated, current.revision).await?;
                Ok(HandlerOutcome::Applied)
            }
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid => {
                let updated = current.merged(&SubscriptionChanges {
                    status: Some(SubscriptionStatus::Active),
                    ..period
                });
                self.write_subscription(&updated, current.revision).await?;
                self.dispatch(event, key, activate_plan(&updated)).await?;
                Ok(HandlerOutcome::Applied)
            }
        }
    }

    async fn load_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionRecord, WebhookError> {
        self.billing
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                WebhookError::PreconditionNotMet(format!(
                    "subscription {} not found",
                    subscription_id
                ))
            })
    }

    async fn write_subscription(
        &self,
        updated: &SubscriptionRecord,
        expected_revision: i64,
    ) -> Result<(), WebhookError> {
        if !self
            .billing
            .update_subscription(updated, expected_revision)
            .await?
        {
            return Err(WebhookError::PreconditionNotMet(format!(
                "concurrent update on subscription {}",
                updated.subscription_id
            )));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        event: &ProviderEvent,
        idempotency_key: String,
        action: DomainAction,
    ) -> Result<(), WebhookError> {
        let kind = action.kind();
        self.actions
            .apply(ActionRequest {
                idempotency_key: idempotency_key.clone(),
                event_id: event.id.clone(),
                action,
            })
            .await?;
        tracing::debug!(event_id = %event.id, action = kind, key = %idempotency_key, "domain action dispatched");
        Ok(())
    }
}

fn subscription_changes(object: &SubscriptionObject) -> SubscriptionChanges {
    SubscriptionChanges {
        plan: object.plan.clone(),
        status: object
            .status
            .as_deref()
            .and_then(SubscriptionStatus::from_provider),
        current_period_start: unix_to_datetime(object.current_period_start),
        current_period_end: unix_to_datetime(object.current_period_end),
        cancel_at_period_end: object.cancel_at_period_end,
        source_version: object.ordering_version(),
    }
}

fn activate_plan(record: &SubscriptionRecord) -> DomainAction {
    DomainAction::ActivatePlan {
        user_id: record.user_id.clone(),
        subscription_id: record.subscription_id.clone(),
        plan: record.plan.clone(),
    }
}

fn revoke_plan(record: &SubscriptionRecord) -> DomainAction {
    DomainAction::RevokePlan {
        user_id: record.user_id.clone(),
        subscription_id: record.subscription_id.clone(),
        effective_at: record.current_period_end,
    }
}

/// Side effect that holds for as long as a subscription keeps its status.
fn standing_effect(record: &SubscriptionRecord) -> Option<DomainAction> {
    match record.status {
        SubscriptionStatus::Active => Some(activate_plan(record)),
        SubscriptionStatus::PastDue => Some(DomainAction::NotifyUser {
            user_id: record.user_id.clone(),
            notice: UserNotice::PastDue {
                subscription_id: record.subscription_id.clone(),
            },
        }),
        SubscriptionStatus::Unpaid | SubscriptionStatus::Canceled => Some(revoke_plan(record)),
    }
}

/// Idempotency key for the effect of a subscription update.
///
/// A cancellation shares the key `subscription.deleted` uses.
fn update_key(
    action: &DomainAction,
    record: &SubscriptionRecord,
    version: Option<i64>,
    event: &ProviderEvent,
) -> String {
    if record.status == SubscriptionStatus::Canceled {
        return format!("revoke_plan:{}:canceled", record.subscription_id);
    }
    match version {
        Some(version) => format!("{}:{}:v{}", action.kind(), record.subscription_id, version),
        None => format!("{}:{}:{}", action.kind(), record.subscription_id, event.id),
    }
}

/// Side effect of a subscription moving from `before` to `after`.
fn status_effect(before: &SubscriptionRecord, after: &SubscriptionRecord) -> Option<DomainAction> {
    match after.status {
        SubscriptionStatus::Active
            if before.status != SubscriptionStatus::Active || before.plan != after.plan =>
        {
            Some(activate_plan(after))
        }
        SubscriptionStatus::PastDue if before.status != SubscriptionStatus::PastDue => {
            Some(DomainAction::NotifyUser {
                user_id: after.user_id.clone(),
                notice: UserNotice::PastDue {
                    subscription_id: after.subscription_id.clone(),
                },
            })
        }
        SubscriptionStatus::Unpaid | SubscriptionStatus::Canceled if before.status.has_access() => {
            Some(revoke_plan(after))
        }
        _ => None,
    }
}
