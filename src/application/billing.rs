use crate::domain::{
    BillingEvent, BillingSubscription, CheckoutSession, Subscription, SubscriptionPlan,
    SubscriptionStatus, User,
};
use crate::infrastructure::{
    BillingProvider, BillingProviderError, CheckoutRequest, RepositoryError,
    SubscriptionRepository, UserRepository,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Billing provider error: {0}")]
    Provider(#[from] BillingProviderError),
    #[error("No active subscription")]
    NoActiveSubscription,
    #[error("Billing state integrity violation: {0}")]
    Integrity(String),
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub monthly_price_id: String,
    pub yearly_price_id: String,
    pub app_url: String,
}

impl BillingSettings {
    fn price_for(&self, plan: SubscriptionPlan) -> &str {
        match plan {
            SubscriptionPlan::Monthly => &self.monthly_price_id,
            SubscriptionPlan::Yearly => &self.yearly_price_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStatusView {
    pub is_subscribed: bool,
    /// `free`, `monthly` or `yearly`.
    pub plan: String,
    pub status: Option<SubscriptionStatus>,
    pub renewal_date: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

impl SubscriptionStatusView {
    pub fn free() -> Self {
        Self {
            is_subscribed: false,
            plan: "free".to_string(),
            status: None,
            renewal_date: None,
            cancel_at_period_end: false,
        }
    }
}

impl From<&Subscription> for SubscriptionStatusView {
    fn from(subscription: &Subscription) -> Self {
        Self {
            is_subscribed: subscription.is_active(),
            plan: subscription.plan.to_string(),
            status: Some(subscription.status),
            renewal_date: Some(subscription.current_period_end),
            cancel_at_period_end: subscription.cancel_at_period_end,
        }
    }
}

pub struct BillingService<S, U, P>
where
    S: SubscriptionRepository,
    U: UserRepository,
    P: BillingProvider,
{
    subscription_repo: Arc<S>,
    user_repo: Arc<U>,
    provider: Arc<P>,
    settings: BillingSettings,
}

impl<S, U, P> BillingService<S, U, P>
where
    S: SubscriptionRepository,
    U: UserRepository,
    P: BillingProvider,
{
    pub fn new(
        subscription_repo: Arc<S>,
        user_repo: Arc<U>,
        provider: Arc<P>,
        settings: BillingSettings,
    ) -> Self {
        Self {
            subscription_repo,
            user_repo,
            provider,
            settings,
        }
    }

    /// Start a hosted checkout for `plan` and return the URL to redirect to.
    pub async fn create_checkout(
        &self,
        user: &User,
        plan: SubscriptionPlan,
    ) -> Result<String, BillingError> {
        let price_id = self.settings.price_for(plan);
        if price_id.is_empty() {
            return Err(BillingError::InvalidConfig(format!(
                "No price configured for {} plan",
                plan
            )));
        }

        let app_url = self.settings.app_url.trim_end_matches('/');
        let request = CheckoutRequest {
            price_id: price_id.to_string(),
            customer_email: user.email.clone(),
            success_url: format!("{}/dashboard?success=true", app_url),
            cancel_url: format!("{}/pricing?canceled=true", app_url),
            metadata: HashMap::from([
                ("user_id".to_string(), user.id.to_string()),
                ("external_id".to_string(), user.external_id.clone()),
            ]),
        };

        let url = self.provider.create_checkout_session(&request).await?;
        info!(user_id = %user.id, plan = %plan, "Created checkout session");
        Ok(url)
    }

    /// Stop renewal at the end of the current period.
    pub async fn cancel(&self, user: &User) -> Result<Subscription, BillingError> {
        self.set_cancel_at_period_end(user, true).await
    }

    /// Undo a pending cancellation.
    pub async fn reactivate(&self, user: &User) -> Result<Subscription, BillingError> {
        self.set_cancel_at_period_end(user, false).await
    }

    async fn set_cancel_at_period_end(
        &self,
        user: &User,
        cancel: bool,
    ) -> Result<Subscription, BillingError> {
        let mut subscription = self
            .subscription_repo
            .find_active_for_user(user.id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;

        // Provider first; the local row only mirrors what it accepted.
        let details = self
            .provider
            .set_cancel_at_period_end(&subscription.billing_subscription_id, cancel)
            .await?;

        self.subscription_repo
            .set_cancel_at_period_end(subscription.id, details.cancel_at_period_end)
            .await?;

        info!(
            user_id = %user.id,
            subscription_id = %subscription.billing_subscription_id,
            cancel_at_period_end = details.cancel_at_period_end,
            "Updated subscription renewal"
        );

        subscription.cancel_at_period_end = details.cancel_at_period_end;
        subscription.updated_at = Utc::now();
        Ok(subscription)
    }

    /// Plan summary for display. Storage errors degrade to the free view.
    pub async fn subscription_status(&self, user: &User) -> SubscriptionStatusView {
        match self.subscription_repo.find_active_for_user(user.id).await {
            Ok(Some(subscription)) => SubscriptionStatusView::from(&subscription),
            Ok(None) => SubscriptionStatusView::free(),
            Err(e) => {
                error!(user_id = %user.id, error = %e, "Failed to load subscription status");
                SubscriptionStatusView::free()
            }
        }
    }

    /// Verify an inbound webhook and apply it. Returns the event type.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<String, BillingError> {
        let event = self.provider.verify_webhook(payload, signature_header)?;
        let event_type = event.event_type().to_string();

        if let Err(e) = self.reconcile_subscription_event(event).await {
            error!(event_type = %event_type, error = %e, "Webhook reconciliation failed");
            return Err(e);
        }

        Ok(event_type)
    }

    /// Apply one verified provider event to local subscription state.
    ///
    /// Events that reference a subscription or user we do not know are
    /// integrity violations and are returned as errors.
    pub async fn reconcile_subscription_event(
        &self,
        event: BillingEvent,
    ) -> Result<(), BillingError> {
        match event {
            BillingEvent::CheckoutCompleted(session) => self.apply_checkout(session).await,
            BillingEvent::SubscriptionCreated(details)
            | BillingEvent::SubscriptionUpdated(details) => self.apply_update(details).await,
            BillingEvent::SubscriptionDeleted { subscription_id } => {
                self.apply_deletion(&subscription_id).await
            }
            BillingEvent::Unhandled { event_type } => {
                debug!(event_type = %event_type, "Acknowledged unhandled billing event");
                Ok(())
            }
        }
    }

    async fn apply_checkout(&self, session: CheckoutSession) -> Result<(), BillingError> {
        let external_id = session.metadata.get("external_id").ok_or_else(|| {
            BillingError::Integrity(format!("Checkout session {} has no external_id", session.id))
        })?;

        let user = self
            .user_repo
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| {
                BillingError::Integrity(format!(
                    "Checkout session {} references unknown user {}",
                    session.id, external_id
                ))
            })?;

        let subscription_id = session.subscription_id.as_deref().ok_or_else(|| {
            BillingError::Integrity(format!("Checkout session {} has no subscription", session.id))
        })?;

        let details = self.provider.retrieve_subscription(subscription_id).await?;

        match self.subscription_repo.find_for_user(user.id).await? {
            Some(existing) => {
                self.subscription_repo
                    .replace_billing_details(existing.id, &details)
                    .await?;
                info!(
                    user_id = %user.id,
                    subscription_id = %details.id,
                    "Updated subscription from checkout"
                );
            }
            None => {
                let subscription =
                    Subscription::from_billing(user.id, details.customer_id.clone(), &details);
                self.subscription_repo.create(&subscription).await?;
                info!(
                    user_id = %user.id,
                    subscription_id = %details.id,
                    plan = %subscription.plan,
                    "Created subscription from checkout"
                );
            }
        }

        Ok(())
    }

    async fn apply_update(&self, details: BillingSubscription) -> Result<(), BillingError> {
        let existing = self.find_by_billing_id(&details.id).await?;

        if !existing.status.can_transition_to(details.status) {
            warn!(
                subscription_id = %details.id,
                from = %existing.status,
                to = %details.status,
                "Ignoring status change on canceled subscription"
            );
            return Ok(());
        }

        self.subscription_repo
            .update_state(
                &details.id,
                details.status,
                details.current_period_start,
                details.current_period_end,
                details.cancel_at_period_end,
            )
            .await?;

        info!(subscription_id = %details.id, status = %details.status, "Subscription updated");
        Ok(())
    }

    async fn apply_deletion(&self, subscription_id: &str) -> Result<(), BillingError> {
        self.find_by_billing_id(subscription_id).await?;
        self.subscription_repo
            .update_status(subscription_id, SubscriptionStatus::Canceled)
            .await?;

        info!(subscription_id = %subscription_id, "Subscription canceled");
        Ok(())
    }

    async fn find_by_billing_id(&self, subscription_id: &str) -> Result<Subscription, BillingError> {
        self.subscription_repo
            .find_by_billing_id(subscription_id)
            .await?
            .ok_or_else(|| {
                BillingError::Integrity(format!("Unknown subscription {}", subscription_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserIdentity;
    use crate::infrastructure::{MockBillingProvider, MockSubscriptionRepository, MockUserRepository};
    use chrono::Duration;
    use mockall::predicate::eq;

    fn settings() -> BillingSettings {
        BillingSettings {
            monthly_price_id: "price_month".to_string(),
            yearly_price_id: "price_year".to_string(),
            app_url: "https://desk.example.com/".to_string(),
        }
    }

    fn service(
        subs: MockSubscriptionRepository,
        users: MockUserRepository,
        provider: MockBillingProvider,
    ) -> BillingService<MockSubscriptionRepository, MockUserRepository, MockBillingProvider> {
        BillingService::new(Arc::new(subs), Arc::new(users), Arc::new(provider), settings())
    }

    fn details(id: &str, status: SubscriptionStatus, cancel: bool) -> BillingSubscription {
        let now = Utc::now();
        BillingSubscription {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            price_id: "price_year".to_string(),
            interval: Some("year".to_string()),
            status,
            current_period_start: now,
            current_period_end: now + Duration::days(365),
            cancel_at_period_end: cancel,
        }
    }

    fn stored(user: &User, status: SubscriptionStatus) -> Subscription {
        let mut sub = Subscription::from_billing(
            user.id,
            "cus_1".to_string(),
            &details("sub_1", status, false),
        );
        sub.status = status;
        sub
    }

    #[tokio::test]
    async fn checkout_carries_user_metadata_and_plan_price() {
        let user = User::new(&UserIdentity::new("user_a").with_email("a@example.com"));
        let expected_id = user.id.to_string();

        let mut provider = MockBillingProvider::new();
        provider
            .expect_create_checkout_session()
            .withf(move |req| {
                req.price_id == "price_year"
                    && req.customer_email == "a@example.com"
                    && req.success_url == "https://desk.example.com/dashboard?success=true"
                    && req.metadata.get("user_id") == Some(&expected_id)
                    && req.metadata.get("external_id").map(String::as_str) == Some("user_a")
            })
            .times(1)
            .returning(|_| Ok("https://checkout.example/cs_1".to_string()));

        let svc = service(
            MockSubscriptionRepository::new(),
            MockUserRepository::new(),
            provider,
        );

        let url = svc
            .create_checkout(&user, SubscriptionPlan::Yearly)
            .await
            .unwrap();
        assert_eq!(url, "https://checkout.example/cs_1");
    }

    #[tokio::test]
    async fn checkout_without_configured_price_is_rejected() {
        let user = User::new(&UserIdentity::new("user_a"));
        let svc = BillingService::new(
            Arc::new(MockSubscriptionRepository::new()),
            Arc::new(MockUserRepository::new()),
            Arc::new(MockBillingProvider::new()),
            BillingSettings {
                monthly_price_id: String::new(),
                ..settings()
            },
        );

        assert!(matches!(
            svc.create_checkout(&user, SubscriptionPlan::Monthly).await,
            Err(BillingError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn cancel_updates_provider_before_local_row() {
        let user = User::new(&UserIdentity::new("user_a"));
        let sub = stored(&user, SubscriptionStatus::Active);
        let sub_id = sub.id;

        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_active_for_user()
            .returning(move |_| Ok(Some(sub.clone())));
        subs.expect_set_cancel_at_period_end()
            .with(eq(sub_id), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut provider = MockBillingProvider::new();
        provider
            .expect_set_cancel_at_period_end()
            .withf(|id, cancel| id == "sub_1" && *cancel)
            .times(1)
            .returning(|id, _| Ok(details(id, SubscriptionStatus::Active, true)));

        let svc = service(subs, MockUserRepository::new(), provider);
        let updated = svc.cancel(&user).await.unwrap();
        assert!(updated.cancel_at_period_end);
    }

    #[tokio::test]
    async fn failed_provider_call_leaves_local_row_alone() {
        let user = User::new(&UserIdentity::new("user_a"));
        let sub = stored(&user, SubscriptionStatus::Active);

        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_active_for_user()
            .returning(move |_| Ok(Some(sub.clone())));
        subs.expect_set_cancel_at_period_end().never();

        let mut provider = MockBillingProvider::new();
        provider
            .expect_set_cancel_at_period_end()
            .returning(|_, _| Err(BillingProviderError::RateLimited));

        let svc = service(subs, MockUserRepository::new(), provider);
        assert!(matches!(
            svc.reactivate(&user).await,
            Err(BillingError::Provider(BillingProviderError::RateLimited))
        ));
    }

    #[tokio::test]
    async fn cancel_without_active_subscription_is_rejected() {
        let user = User::new(&UserIdentity::new("user_a"));
        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_active_for_user().returning(|_| Ok(None));

        let svc = service(subs, MockUserRepository::new(), MockBillingProvider::new());
        assert!(matches!(
            svc.cancel(&user).await,
            Err(BillingError::NoActiveSubscription)
        ));
    }

    #[tokio::test]
    async fn canceled_subscription_does_not_come_back_through_updates() {
        let user = User::new(&UserIdentity::new("user_a"));
        let sub = stored(&user, SubscriptionStatus::Canceled);

        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_by_billing_id()
            .returning(move |_| Ok(Some(sub.clone())));
        subs.expect_update_state().never();

        let svc = service(subs, MockUserRepository::new(), MockBillingProvider::new());
        svc.reconcile_subscription_event(BillingEvent::SubscriptionUpdated(details(
            "sub_1",
            SubscriptionStatus::Active,
            false,
        )))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn lapsed_payment_status_is_applied_to_active_row() {
        let user = User::new(&UserIdentity::new("user_a"));
        let sub = stored(&user, SubscriptionStatus::Active);

        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_by_billing_id()
            .with(eq("sub_1"))
            .returning(move |_| Ok(Some(sub.clone())));
        subs.expect_update_state()
            .withf(|id, status, _, _, cancel| {
                id == "sub_1" && *status == SubscriptionStatus::Unpaid && !*cancel
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let svc = service(subs, MockUserRepository::new(), MockBillingProvider::new());
        svc.reconcile_subscription_event(BillingEvent::SubscriptionUpdated(details(
            "sub_1",
            SubscriptionStatus::Unpaid,
            false,
        )))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn status_view_degrades_to_free_on_storage_error() {
        let user = User::new(&UserIdentity::new("user_a"));
        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_active_for_user()
            .returning(|_| Err(RepositoryError::InvalidData("broken row".to_string())));

        let svc = service(subs, MockUserRepository::new(), MockBillingProvider::new());
        assert_eq!(
            svc.subscription_status(&user).await,
            SubscriptionStatusView::free()
        );
    }

    #[tokio::test]
    async fn invalid_signature_never_reaches_reconciliation() {
        let mut provider = MockBillingProvider::new();
        provider
            .expect_verify_webhook()
            .returning(|_, _| Err(BillingProviderError::InvalidSignature("bad".to_string())));

        let mut subs = MockSubscriptionRepository::new();
        subs.expect_find_by_billing_id().never();

        let svc = service(subs, MockUserRepository::new(), provider);
        assert!(matches!(
            svc.handle_webhook(b"{}", "t=1,v1=00").await,
            Err(BillingError::Provider(BillingProviderError::InvalidSignature(_)))
        ));
    }

    #[tokio::test]
    async fn checkout_without_metadata_is_an_integrity_error() {
        let svc = service(
            MockSubscriptionRepository::new(),
            MockUserRepository::new(),
            MockBillingProvider::new(),
        );

        let result = svc
            .reconcile_subscription_event(BillingEvent::CheckoutCompleted(CheckoutSession {
                id: "cs_1".to_string(),
                customer_id: None,
                subscription_id: Some("sub_1".to_string()),
                metadata: HashMap::new(),
            }))
            .await;
        assert!(matches!(result, Err(BillingError::Integrity(_))));
    }
}
