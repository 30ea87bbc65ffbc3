//! Subscription records, their lifecycle, and last-writer-wins merging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{StateMachine, ValidationError};

/// Subscription lifecycle status.
///
/// `Canceled` is terminal. Records are never deleted, so a canceled
/// subscription stays in storage for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid up, plan access granted.
    Active,
    /// A renewal charge failed; the provider is retrying (dunning).
    PastDue,
    /// Provider gave up collecting; access withheld until paid.
    Unpaid,
    /// Subscription ended.
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        Self::from_provider(s).ok_or_else(|| {
            ValidationError::invalid_format("subscription_status", format!("unknown value '{}'", s))
        })
    }

    /// Maps a provider status string onto the local lifecycle.
    ///
    /// Returns `None` for provider states with no local counterpart
    /// (`incomplete`, `paused`), in which case the stored status is kept.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "active" | "trialing" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "unpaid" | "incomplete_expired" => Some(SubscriptionStatus::Unpaid),
            "canceled" | "cancelled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }

    /// Returns true if this status grants plan access.
    pub fn has_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Active, Active)
                | (Active, PastDue)
                | (Active, Unpaid)
                | (Active, Canceled)
                | (PastDue, PastDue)
                | (PastDue, Active)
                | (PastDue, Unpaid)
                | (PastDue, Canceled)
                | (Unpaid, Active)
                | (Unpaid, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Active => vec![Active, PastDue, Unpaid, Canceled],
            PastDue => vec![PastDue, Active, Unpaid, Canceled],
            Unpaid => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}

/// A subscription owned by the billing subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub user_id: String,
    /// Plan or price identifier, when the provider sends one.
    pub plan: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Highest provider version (or `updated_at`) applied so far.
    pub source_version: Option<i64>,
    /// Local revision, bumped on every write. Used as the optimistic lock.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field changes carried by a subscription event.
///
/// `None` means "not present in the payload"; the stored value is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionChanges {
    pub plan: Option<String>,
    pub status: Option<SubscriptionStatus>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
    pub source_version: Option<i64>,
}

impl SubscriptionRecord {
    /// Builds a freshly created, active subscription.
    pub fn activated(
        subscription_id: impl Into<String>,
        user_id: impl Into<String>,
        changes: &SubscriptionChanges,
    ) -> Self {
        let now = Utc::now();
        Self {
            subscription_id: subscription_id.into(),
            user_id: user_id.into(),
            plan: changes.plan.clone(),
            status: SubscriptionStatus::Active,
            current_period_start: changes.current_period_start,
            current_period_end: changes.current_period_end,
            cancel_at_period_end: changes.cancel_at_period_end.unwrap_or(false),
            source_version: changes.source_version,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Last-writer-wins check.
    ///
    /// An incoming version at or below the stored one is stale. Without an
    /// incoming version nothing can be compared and the update applies.
    pub fn is_stale(&self, incoming_version: Option<i64>) -> bool {
        matches!(
            (self.source_version, incoming_version),
            (Some(stored), Some(incoming)) if incoming <= stored
        )
    }

    /// Returns true if every field `changes` carries already holds.
    ///
    /// `source_version` is not compared.
    pub fn reflects(&self, changes: &SubscriptionChanges) -> bool {
        changes.status.map_or(true, |status| status == self.status)
            && changes
                .plan
                .as_ref()
                .map_or(true, |plan| self.plan.as_ref() == Some(plan))
            && changes
                .current_period_start
                .map_or(true, |start| self.current_period_start == Some(start))
            && changes
                .current_period_end
                .map_or(true, |end| self.current_period_end == Some(end))
            && changes
                .cancel_at_period_end
                .map_or(true, |flag| flag == self.cancel_at_period_end)
    }

    /// Returns the record as it looks after `changes` are applied.
    ///
    /// Status changes that the lifecycle forbids (anything out of
    /// `Canceled`) are dropped; the other fields still apply.
    pub fn merged(&self, changes: &SubscriptionChanges) -> Self {
        let status = match changes.status {
            Some(next) if self.status.can_transition_to(&next) || next == self.status => next,
            _ => self.status,
        };

        Self {
            subscription_id: self.subscription_id.clone(),
            user_id: self.user_id.clone(),
            plan: changes.plan.clone().or_else(|| self.plan.clone()),
            status,
            current_period_start: changes.current_period_start.or(self.current_period_start),
            current_period_end: changes.current_period_end.or(self.current_period_end),
            cancel_at_period_end: changes
                .cancel_at_period_end
                .unwrap_or(self.cancel_at_period_end),
            source_version: match (self.source_version, changes.source_version) {
                (Some(stored), Some(incoming)) => Some(stored.max(incoming)),
                (stored, incoming) => incoming.or(stored),
            },
            revision: self.revision + 1,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn subscription(version: Option<i64>) -> SubscriptionRecord {
        SubscriptionRecord::activated(
            "sub_1",
            "user_1",
            &SubscriptionChanges {
                plan: Some("pro".to_string()),
                source_version: version,
                ..Default::default()
            },
        )
    }

    // ══════════════════════════════════════════════════════════════
    // Status Lifecycle Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn canceled_is_terminal() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(SubscriptionStatus::Canceled
            .transition_to(SubscriptionStatus::Active)
            .is_err());
    }

    #[test]
    fn past_due_recovers_to_active() {
        assert!(SubscriptionStatus::PastDue.can_transition_to(&SubscriptionStatus::Active));
    }

    #[test]
    fn unpaid_does_not_fall_back_to_past_due() {
        assert!(!SubscriptionStatus::Unpaid.can_transition_to(&SubscriptionStatus::PastDue));
    }

    #[test]
    fn provider_statuses_map_to_local_lifecycle() {
        assert_eq!(
            SubscriptionStatus::from_provider("trialing"),
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(
            SubscriptionStatus::from_provider("incomplete_expired"),
            Some(SubscriptionStatus::Unpaid)
        );
        assert_eq!(
            SubscriptionStatus::from_provider("cancelled"),
            Some(SubscriptionStatus::Canceled)
        );
        assert_eq!(SubscriptionStatus::from_provider("incomplete"), None);
    }

    #[test]
    fn only_active_and_past_due_have_access() {
        assert!(SubscriptionStatus::Active.has_access());
        assert!(SubscriptionStatus::PastDue.has_access());
        assert!(!SubscriptionStatus::Unpaid.has_access());
        assert!(!SubscriptionStatus::Canceled.has_access());
    }

    // ══════════════════════════════════════════════════════════════
    // Last-Writer-Wins Tests
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn older_version_is_stale() {
        let record = subscription(Some(5));
        assert!(record.is_stale(Some(4)));
        assert!(record.is_stale(Some(5)));
        assert!(!record.is_stale(Some(6)));
    }

    #[test]
    fn missing_versions_are_never_stale() {
        assert!(!subscription(Some(5)).is_stale(None));
        assert!(!subscription(None).is_stale(Some(1)));
        assert!(!subscription(None).is_stale(None));
    }

    #[test]
    fn merge_keeps_fields_absent_from_changes() {
        let record = subscription(Some(1));
        let merged = record.merged(&SubscriptionChanges {
            status: Some(SubscriptionStatus::PastDue),
            source_version: Some(2),
            ..Default::default()
        });

        assert_eq!(merged.status, SubscriptionStatus::PastDue);
        assert_eq!(merged.plan.as_deref(), Some("pro"));
        assert_eq!(merged.source_version, Some(2));
        assert_eq!(merged.revision, record.revision + 1);
    }

    #[test]
    fn merge_never_reopens_canceled_subscription() {
        let mut record = subscription(Some(1));
        record.status = SubscriptionStatus::Canceled;

        let merged = record.merged(&SubscriptionChanges {
            status: Some(SubscriptionStatus::Active),
            cancel_at_period_end: Some(true),
            ..Default::default()
        });

        assert_eq!(merged.status, SubscriptionStatus::Canceled);
        assert!(merged.cancel_at_period_end);
    }

    #[test]
    fn reflects_compares_only_the_carried_fields() {
        let record = subscription(Some(3));

        assert!(record.reflects(&SubscriptionChanges::default()));
        assert!(record.reflects(&SubscriptionChanges {
            status: Some(SubscriptionStatus::Active),
            plan: Some("pro".to_string()),
            source_version: Some(9),
            ..Default::default()
        }));
        assert!(!record.reflects(&SubscriptionChanges {
            status: Some(SubscriptionStatus::Unpaid),
            ..Default::default()
        }));
        assert!(!record.reflects(&SubscriptionChanges {
            cancel_at_period_end: Some(true),
            ..Default::default()
        }));
    }

    proptest! {
        #[test]
        fn lww_converges_to_highest_version(mut versions in proptest::collection::vec(1i64..1_000, 1..12)) {
            let mut record = subscription(None);
            let expected = *versions.iter().max().unwrap();

            // Deliver in an arbitrary order; plan carries the version it was written by.
            versions.reverse();
            for v in &versions {
                if !record.is_stale(Some(*v)) {
                    record = record.merged(&SubscriptionChanges {
                        plan: Some(format!("plan_v{}", v)),
                        source_version: Some(*v),
                        ..Default::default()
                    });
                }
            }

            prop_assert_eq!(record.source_version, Some(expected));
            prop_assert_eq!(record.plan, Some(format!("plan_v{}", expected)));
        }
    }
}
