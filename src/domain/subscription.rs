use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub billing_customer_id: String,
    pub billing_subscription_id: String,
    pub billing_price_id: String,
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionPlan {
    Monthly,
    Yearly,
}

impl SubscriptionPlan {
    /// `year` bills yearly; every other interval is treated as monthly.
    pub fn from_interval(interval: Option<&str>) -> Self {
        match interval {
            Some("year") => SubscriptionPlan::Yearly,
            _ => SubscriptionPlan::Monthly,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Whether a provider-reported status may replace this one.
    ///
    /// The provider is authoritative for every move except out of `canceled`,
    /// which is terminal for a given subscription ID.
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        self != SubscriptionStatus::Canceled || next == SubscriptionStatus::Canceled
    }
}

impl Subscription {
    pub fn from_billing(
        user_id: Uuid,
        customer_id: String,
        details: &BillingSubscription,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            billing_customer_id: customer_id,
            billing_subscription_id: details.id.clone(),
            billing_price_id: details.price_id.clone(),
            plan: SubscriptionPlan::from_interval(details.interval.as_deref()),
            status: details.status,
            current_period_start: details.current_period_start,
            current_period_end: details.current_period_end,
            cancel_at_period_end: details.cancel_at_period_end,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Authoritative subscription details as reported by the billing provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BillingSubscription {
    pub id: String,
    pub customer_id: String,
    pub price_id: String,
    pub interval: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Verified billing-provider event, reduced to the kinds we reconcile.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutSession),
    SubscriptionCreated(BillingSubscription),
    SubscriptionUpdated(BillingSubscription),
    SubscriptionDeleted { subscription_id: String },
    Unhandled { event_type: String },
}

impl BillingEvent {
    pub fn event_type(&self) -> &str {
        match self {
            BillingEvent::CheckoutCompleted(_) => "checkout.session.completed",
            BillingEvent::SubscriptionCreated(_) => "customer.subscription.created",
            BillingEvent::SubscriptionUpdated(_) => "customer.subscription.updated",
            BillingEvent::SubscriptionDeleted { .. } => "customer.subscription.deleted",
            BillingEvent::Unhandled { event_type } => event_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn plan_derives_from_billing_interval() {
        assert_eq!(SubscriptionPlan::from_interval(Some("year")), SubscriptionPlan::Yearly);
        assert_eq!(SubscriptionPlan::from_interval(Some("month")), SubscriptionPlan::Monthly);
        assert_eq!(SubscriptionPlan::from_interval(Some("week")), SubscriptionPlan::Monthly);
        assert_eq!(SubscriptionPlan::from_interval(None), SubscriptionPlan::Monthly);
    }

    #[test]
    fn canceled_is_terminal() {
        assert!(!SubscriptionStatus::Canceled.can_transition_to(SubscriptionStatus::Active));
        assert!(!SubscriptionStatus::Canceled.can_transition_to(SubscriptionStatus::PastDue));
        assert!(SubscriptionStatus::Canceled.can_transition_to(SubscriptionStatus::Canceled));
    }

    #[test]
    fn provider_status_wins_outside_canceled() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(PastDue));
        assert!(Active.can_transition_to(Canceled));
        assert!(PastDue.can_transition_to(Active));
        for next in [Unpaid, Paused, IncompleteExpired, Trialing, Incomplete] {
            assert!(Active.can_transition_to(next), "active -> {next}");
        }
        assert!(Incomplete.can_transition_to(Active));
    }

    #[test]
    fn status_strings_match_provider_values() {
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
        assert_eq!(
            SubscriptionStatus::from_str("incomplete_expired").unwrap(),
            SubscriptionStatus::IncompleteExpired
        );
        assert!(SubscriptionStatus::from_str("bogus").is_err());
    }
}
