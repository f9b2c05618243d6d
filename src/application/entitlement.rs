use crate::domain::{daily_count_is_stale, start_of_day, User, UserIdentity};
use crate::infrastructure::{RepositoryError, SubscriptionRepository, UserRepository};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("User not found: {0}")]
    UserNotFound(String),
}

/// What a quota decision falls back to when storage cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaFailurePolicy {
    /// Soft quota: storage errors permit the action.
    #[default]
    FailOpen,
    /// Storage errors deny the action.
    FailClosed,
}

impl QuotaFailurePolicy {
    fn limited_on_error(self) -> bool {
        matches!(self, QuotaFailurePolicy::FailClosed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaEnforcement {
    /// Check before the paid work, increment after it. Concurrent requests can
    /// overshoot the limit.
    #[default]
    BestEffort,
    /// Take a slot with one conditional update before the paid work.
    Atomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSettings {
    pub free_daily_limit: i32,
    pub rolling_window: Option<Duration>,
    pub failure_policy: QuotaFailurePolicy,
    pub enforcement: QuotaEnforcement,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            free_daily_limit: 3,
            rolling_window: Some(Duration::hours(4)),
            failure_policy: QuotaFailurePolicy::FailOpen,
            enforcement: QuotaEnforcement::BestEffort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub daily_reports_count: i32,
    /// `None` for subscribed users.
    pub daily_reports_limit: Option<i32>,
    pub daily_reports_left: Option<i32>,
}

/// Free-tier quota bookkeeping for a user.
///
/// Subscribed users are never metered. Everyone else gets
/// `free_daily_limit` reports per calendar day; the counter is reset lazily
/// the first time it is read after going stale.
pub struct EntitlementTracker<U, S>
where
    U: UserRepository,
    S: SubscriptionRepository,
{
    user_repo: Arc<U>,
    subscription_repo: Arc<S>,
    settings: QuotaSettings,
}

impl<U, S> EntitlementTracker<U, S>
where
    U: UserRepository,
    S: SubscriptionRepository,
{
    pub fn new(user_repo: Arc<U>, subscription_repo: Arc<S>, settings: QuotaSettings) -> Self {
        Self {
            user_repo,
            subscription_repo,
            settings,
        }
    }

    pub fn settings(&self) -> QuotaSettings {
        self.settings
    }

    /// Whether the user is out of free reports for today.
    ///
    /// Storage failures never propagate; the configured failure policy decides.
    pub async fn has_reached_daily_limit(&self, identity: &UserIdentity) -> bool {
        match self.check_daily_limit(identity, Utc::now()).await {
            Ok(limited) => limited,
            Err(e) => {
                let limited = self.settings.failure_policy.limited_on_error();
                error!(
                    external_id = %identity.external_id,
                    error = %e,
                    limited,
                    "Daily limit check failed"
                );
                limited
            }
        }
    }

    async fn check_daily_limit(
        &self,
        identity: &UserIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(user) = self
            .user_repo
            .find_by_external_id(&identity.external_id)
            .await?
        else {
            return Ok(false);
        };

        if self
            .subscription_repo
            .find_active_for_user(user.id)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        if daily_count_is_stale(user.last_report_date, now, self.settings.rolling_window) {
            debug!(user_id = %user.id, previous = user.daily_reports_count, "Resetting stale daily count");
            self.user_repo.update_daily_usage(user.id, 0, now).await?;
            return Ok(false);
        }

        Ok(user.daily_reports_count >= self.settings.free_daily_limit)
    }

    /// Record one generated report. Storage failures are logged and dropped.
    pub async fn increment_daily_report_count(&self, identity: &UserIdentity) {
        if let Err(e) = self.increment(identity, Utc::now()).await {
            error!(
                external_id = %identity.external_id,
                error = %e,
                "Failed to increment daily report count"
            );
        }
    }

    async fn increment(
        &self,
        identity: &UserIdentity,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match self
            .user_repo
            .find_by_external_id(&identity.external_id)
            .await?
        {
            Some(user) => {
                self.user_repo
                    .update_daily_usage(user.id, user.daily_reports_count + 1, now)
                    .await
            }
            None => {
                let mut user = User::new(identity);
                user.daily_reports_count = 1;
                user.last_report_date = Some(now);
                self.user_repo.create(&user).await
            }
        }
    }

    /// Take one free-tier slot in a single storage operation.
    ///
    /// Returns whether the action may proceed. Subscribed users are granted
    /// without touching the counter.
    pub async fn reserve_daily_report(&self, identity: &UserIdentity) -> bool {
        match self.reserve(identity, Utc::now()).await {
            Ok(granted) => granted,
            Err(e) => {
                let granted = !self.settings.failure_policy.limited_on_error();
                error!(
                    external_id = %identity.external_id,
                    error = %e,
                    granted,
                    "Daily report reservation failed"
                );
                granted
            }
        }
    }

    async fn reserve(
        &self,
        identity: &UserIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let user = self.user_repo.ensure(&User::new(identity)).await?;

        if self
            .subscription_repo
            .find_active_for_user(user.id)
            .await?
            .is_some()
        {
            return Ok(true);
        }

        let consumed = self
            .user_repo
            .try_consume_daily_report(
                user.id,
                self.settings.free_daily_limit,
                self.reset_before(now),
                now,
            )
            .await?;

        if consumed.is_none() {
            info!(user_id = %user.id, "Free daily quota exhausted");
        }
        Ok(consumed.is_some())
    }

    /// Give back a slot taken by `reserve_daily_report` when the paid work failed.
    ///
    /// Plain read-modify-write; failures are logged and dropped.
    pub async fn release_daily_report(&self, identity: &UserIdentity) {
        let result = async {
            if let Some(user) = self
                .user_repo
                .find_by_external_id(&identity.external_id)
                .await?
            {
                if user.daily_reports_count > 0 {
                    let last = user.last_report_date.unwrap_or_else(Utc::now);
                    self.user_repo
                        .update_daily_usage(user.id, user.daily_reports_count - 1, last)
                        .await?;
                }
            }
            Ok::<(), RepositoryError>(())
        }
        .await;

        if let Err(e) = result {
            error!(external_id = %identity.external_id, error = %e, "Failed to release daily report slot");
        }
    }

    /// Counters last touched before this instant count as stale.
    fn reset_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = start_of_day(now);
        match self.settings.rolling_window {
            Some(window) => day_start.max(now - window),
            None => day_start,
        }
    }

    /// Current usage without applying the lazy reset.
    pub async fn usage(&self, identity: &UserIdentity) -> Result<UsageSnapshot, EntitlementError> {
        let now = Utc::now();
        let user = self
            .user_repo
            .find_by_external_id(&identity.external_id)
            .await?;

        let count = match &user {
            Some(u) if !daily_count_is_stale(u.last_report_date, now, self.settings.rolling_window) => {
                u.daily_reports_count
            }
            _ => 0,
        };

        let subscribed = match &user {
            Some(u) => self
                .subscription_repo
                .find_active_for_user(u.id)
                .await?
                .is_some(),
            None => false,
        };

        if subscribed {
            return Ok(UsageSnapshot {
                daily_reports_count: count,
                daily_reports_limit: None,
                daily_reports_left: None,
            });
        }

        let limit = self.settings.free_daily_limit;
        Ok(UsageSnapshot {
            daily_reports_count: count,
            daily_reports_limit: Some(limit),
            daily_reports_left: Some((limit - count).max(0)),
        })
    }

    /// Administrative reset. Returns the count that was cleared.
    pub async fn reset_daily_count(&self, identity: &UserIdentity) -> Result<i32, EntitlementError> {
        let user = self
            .user_repo
            .find_by_external_id(&identity.external_id)
            .await?
            .ok_or_else(|| EntitlementError::UserNotFound(identity.external_id.clone()))?;

        self.user_repo
            .update_daily_usage(user.id, 0, Utc::now())
            .await?;

        warn!(
            user_id = %user.id,
            previous = user.daily_reports_count,
            "Daily report count reset by administrator"
        );
        Ok(user.daily_reports_count)
    }
}
