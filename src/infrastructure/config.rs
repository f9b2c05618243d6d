use crate::application::{QuotaEnforcement, QuotaFailurePolicy};
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub app_url: String,

    /// Required as a bearer token on admin-only routes. Unset disables them.
    pub admin_token: Option<String>,
    /// When set, identity headers are trusted only alongside this bearer token.
    pub auth_gateway_token: Option<String>,

    // Billing provider
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_monthly_price_id: String,
    pub stripe_yearly_price_id: String,
    pub stripe_api_base: String,
    pub webhook_tolerance_secs: i64,

    // Report generator
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_base: String,

    // Free-tier quota
    pub free_daily_limit: i32,
    pub quota_rolling_reset_hours: i64,
    pub quota_failure_policy: QuotaFailurePolicy,
    pub quota_enforcement: QuotaEnforcement,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_defaults(Config::builder())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("DESK"))
            .build()?
            .try_deserialize()
    }

    fn with_defaults(
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        builder
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("app_url", "http://localhost:3000")?
            .set_default("stripe_secret_key", "")?
            .set_default("stripe_webhook_secret", "")?
            .set_default("stripe_monthly_price_id", "")?
            .set_default("stripe_yearly_price_id", "")?
            .set_default("stripe_api_base", "https://api.stripe.com/v1")?
            .set_default("webhook_tolerance_secs", 300)?
            .set_default("openai_api_key", "")?
            .set_default("openai_model", "gpt-4o")?
            .set_default("openai_api_base", "https://api.openai.com/v1")?
            .set_default("free_daily_limit", 3)?
            .set_default("quota_rolling_reset_hours", 4)?
            .set_default("quota_failure_policy", "fail_open")?
            .set_default("quota_enforcement", "best_effort")
    }

    /// Rolling reset window for the free-tier counter; `None` when disabled.
    pub fn quota_rolling_window(&self) -> Option<chrono::Duration> {
        (self.quota_rolling_reset_hours > 0)
            .then(|| chrono::Duration::hours(self.quota_rolling_reset_hours))
    }
}
