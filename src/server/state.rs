use crate::application::{
    AccountService, AnalysisService, BillingService, BillingSettings, EntitlementTracker,
    QuotaSettings, ReportService,
};
use crate::infrastructure::{
    AppConfig, OpenAiClient, PostgresReportRepository, PostgresSubscriptionRepository,
    PostgresUserRepository, StripeClient,
};
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

pub type AccountServiceType = AccountService<PostgresUserRepository>;

pub type EntitlementTrackerType =
    EntitlementTracker<PostgresUserRepository, PostgresSubscriptionRepository>;

pub type BillingServiceType =
    BillingService<PostgresSubscriptionRepository, PostgresUserRepository, StripeClient>;

pub type ReportServiceType =
    ReportService<PostgresReportRepository, PostgresUserRepository, PostgresSubscriptionRepository>;

pub type AnalysisServiceType = AnalysisService<
    PostgresReportRepository,
    PostgresUserRepository,
    PostgresSubscriptionRepository,
    OpenAiClient,
>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub accounts: Arc<AccountServiceType>,
    pub entitlement: Arc<EntitlementTrackerType>,
    pub billing: Arc<BillingServiceType>,
    pub reports: Arc<ReportServiceType>,
    pub analyses: Arc<AnalysisServiceType>,
    pub admin_token: Option<String>,
    pub auth_gateway_token: Option<String>,
}

/// Build full state from config + an existing pool.
///
/// Intended for embedding into a larger service that already manages a `PgPool`.
pub async fn build_state_with_pool(
    config: AppConfig,
    pool: PgPool,
    run_migrations: bool,
) -> anyhow::Result<AppState> {
    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("run migrations")?;
    }

    let stripe = Arc::new(
        StripeClient::new(
            &config.stripe_secret_key,
            config.stripe_webhook_secret.clone(),
            config.stripe_api_base.clone(),
            config.webhook_tolerance_secs,
        )
        .context("init Stripe client")?,
    );

    let generator = Arc::new(
        OpenAiClient::new(
            &config.openai_api_key,
            config.openai_model.clone(),
            config.openai_api_base.clone(),
        )
        .context("init OpenAI client")?,
    );

    let user_repo = Arc::new(PostgresUserRepository::new(pool.clone()));
    let subscription_repo = Arc::new(PostgresSubscriptionRepository::new(pool.clone()));
    let report_repo = Arc::new(PostgresReportRepository::new(pool.clone()));

    let entitlement = Arc::new(EntitlementTracker::new(
        user_repo.clone(),
        subscription_repo.clone(),
        QuotaSettings {
            free_daily_limit: config.free_daily_limit,
            rolling_window: config.quota_rolling_window(),
            failure_policy: config.quota_failure_policy,
            enforcement: config.quota_enforcement,
        },
    ));

    let accounts = Arc::new(AccountService::new(user_repo.clone()));

    let billing = Arc::new(BillingService::new(
        subscription_repo.clone(),
        user_repo.clone(),
        stripe,
        BillingSettings {
            monthly_price_id: config.stripe_monthly_price_id,
            yearly_price_id: config.stripe_yearly_price_id,
            app_url: config.app_url,
        },
    ));

    let reports = Arc::new(ReportService::new(report_repo.clone(), entitlement.clone()));
    let analyses = Arc::new(AnalysisService::new(
        report_repo,
        entitlement.clone(),
        generator,
    ));

    Ok(AppState {
        pool,
        accounts,
        entitlement,
        billing,
        reports,
        analyses,
        admin_token: config.admin_token,
        auth_gateway_token: config.auth_gateway_token,
    })
}

/// Build state for the standalone server.
///
/// Creates the `PgPool`, runs migrations, and wires repositories/services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connect database")?;
    build_state_with_pool(config, pool, true).await
}
