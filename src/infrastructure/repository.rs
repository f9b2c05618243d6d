use crate::domain::{
    BillingSubscription, Report, ReportQuery, ReportType, Subscription, SubscriptionPlan,
    SubscriptionStatus, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    #[must_use]
    async fn find_by_external_id(&self, external_id: &str)
        -> Result<Option<User>, RepositoryError>;
    #[must_use]
    async fn create(&self, user: &User) -> Result<(), RepositoryError>;
    /// Insert `user` unless a row with the same external ID exists; return the stored row.
    #[must_use]
    async fn ensure(&self, user: &User) -> Result<User, RepositoryError>;
    #[must_use]
    async fn update_daily_usage(
        &self,
        user_id: Uuid,
        daily_reports_count: i32,
        last_report_date: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
    /// Conditionally take one free-tier slot in a single statement.
    ///
    /// Counters last touched before `reset_before` restart at 1. Returns the new
    /// count, or `None` when the user is already at `limit`.
    #[must_use]
    async fn try_consume_daily_report(
        &self,
        user_id: Uuid,
        limit: i32,
        reset_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    #[must_use]
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, RepositoryError>;
    /// Most recently updated subscription row for the user, whatever its status.
    #[must_use]
    async fn find_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>, RepositoryError>;
    #[must_use]
    async fn find_by_billing_id(
        &self,
        billing_subscription_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError>;
    #[must_use]
    async fn create(&self, subscription: &Subscription) -> Result<(), RepositoryError>;
    /// Overwrite a row with fresh provider details after a completed checkout.
    #[must_use]
    async fn replace_billing_details(
        &self,
        id: Uuid,
        details: &BillingSubscription,
    ) -> Result<(), RepositoryError>;
    #[must_use]
    async fn update_state(
        &self,
        billing_subscription_id: &str,
        status: SubscriptionStatus,
        current_period_start: DateTime<Utc>,
        current_period_end: DateTime<Utc>,
        cancel_at_period_end: bool,
    ) -> Result<(), RepositoryError>;
    #[must_use]
    async fn update_status(
        &self,
        billing_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), RepositoryError>;
    #[must_use]
    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
    ) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportRepository: Send + Sync {
    #[must_use]
    async fn create(&self, report: &Report) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Report, RepositoryError>;
    #[must_use]
    async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &ReportQuery,
    ) -> Result<Vec<Report>, RepositoryError>;
    /// Count with SQL COUNT(*) rather than loading the page
    #[must_use]
    async fn count_for_user(
        &self,
        user_id: Uuid,
        report_type: Option<ReportType>,
    ) -> Result<i64, RepositoryError>;
    #[must_use]
    async fn update(&self, report: &Report) -> Result<(), RepositoryError>;
    #[must_use]
    async fn delete_for_user(&self, id: Uuid, user_id: Uuid) -> Result<(), RepositoryError>;
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, external_id, email, name, daily_reports_count, last_report_date, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn create(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, name, daily_reports_count, last_report_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.daily_reports_count)
        .bind(user.last_report_date)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ensure(&self, user: &User) -> Result<User, RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, name, daily_reports_count, last_report_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(&user.external_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.daily_reports_count)
        .bind(user.last_report_date)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        self.find_by_external_id(&user.external_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("User {}", user.external_id)))
    }

    async fn update_daily_usage(
        &self,
        user_id: Uuid,
        daily_reports_count: i32,
        last_report_date: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET daily_reports_count = $1, last_report_date = $2
            WHERE id = $3
            "#,
        )
        .bind(daily_reports_count)
        .bind(last_report_date)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("User {}", user_id)));
        }

        Ok(())
    }

    async fn try_consume_daily_report(
        &self,
        user_id: Uuid,
        limit: i32,
        reset_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, RepositoryError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET daily_reports_count = CASE
                    WHEN last_report_date IS NULL OR last_report_date < $2 THEN 1
                    ELSE daily_reports_count + 1
                END,
                last_report_date = $3
            WHERE id = $1
              AND (last_report_date IS NULL OR last_report_date < $2 OR daily_reports_count < $4)
            RETURNING daily_reports_count
            "#,
        )
        .bind(user_id)
        .bind(reset_before)
        .bind(now)
        .bind(limit)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        daily_reports_count: row.try_get("daily_reports_count")?,
        last_report_date: row.try_get("last_report_date")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, user_id, billing_customer_id, billing_subscription_id, billing_price_id,
    plan, status, current_period_start, current_period_end, cancel_at_period_end,
    created_at, updated_at
"#;

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn find_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn find_by_billing_id(
        &self,
        billing_subscription_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE billing_subscription_id = $1
            "#
        ))
        .bind(billing_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_subscription).transpose()
    }

    async fn create(&self, subscription: &Subscription) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, billing_customer_id, billing_subscription_id,
                                       billing_price_id, plan, status, current_period_start,
                                       current_period_end, cancel_at_period_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(&subscription.billing_customer_id)
        .bind(&subscription.billing_subscription_id)
        .bind(&subscription.billing_price_id)
        .bind(subscription.plan.to_string())
        .bind(subscription.status.to_string())
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replace_billing_details(
        &self,
        id: Uuid,
        details: &BillingSubscription,
    ) -> Result<(), RepositoryError> {
        let plan = SubscriptionPlan::from_interval(details.interval.as_deref());

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET billing_subscription_id = $1, billing_price_id = $2, plan = $3, status = $4,
                current_period_start = $5, current_period_end = $6, cancel_at_period_end = $7,
                updated_at = $8, billing_customer_id = $10
            WHERE id = $9
            "#,
        )
        .bind(&details.id)
        .bind(&details.price_id)
        .bind(plan.to_string())
        .bind(details.status.to_string())
        .bind(details.current_period_start)
        .bind(details.current_period_end)
        .bind(details.cancel_at_period_end)
        .bind(Utc::now())
        .bind(id)
        .bind(&details.customer_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_state(
        &self,
        billing_subscription_id: &str,
        status: SubscriptionStatus,
        current_period_start: DateTime<Utc>,
        current_period_end: DateTime<Utc>,
        cancel_at_period_end: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, current_period_start = $2, current_period_end = $3,
                cancel_at_period_end = $4, updated_at = $5
            WHERE billing_subscription_id = $6
            "#,
        )
        .bind(status.to_string())
        .bind(current_period_start)
        .bind(current_period_end)
        .bind(cancel_at_period_end)
        .bind(Utc::now())
        .bind(billing_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        billing_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1, updated_at = $2
            WHERE billing_subscription_id = $3
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(billing_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_cancel_at_period_end(
        &self,
        id: Uuid,
        cancel_at_period_end: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(cancel_at_period_end)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, RepositoryError> {
    let plan_str: String = row.try_get("plan")?;
    let status_str: String = row.try_get("status")?;

    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        billing_customer_id: row.try_get("billing_customer_id")?,
        billing_subscription_id: row.try_get("billing_subscription_id")?,
        billing_price_id: row.try_get("billing_price_id")?,
        plan: SubscriptionPlan::from_str(&plan_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown plan: {}", plan_str)))?,
        status: SubscriptionStatus::from_str(&status_str)
            .map_err(|_| RepositoryError::InvalidData(format!("Unknown status: {}", status_str)))?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
