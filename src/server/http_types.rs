use crate::application::{SubscriptionStatusView, UsageSnapshot};
use crate::domain::Report;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub(super) struct HealthResponse {
    pub(super) status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) error: Option<String>,
}

#[derive(Deserialize, Debug, IntoParams, ToSchema)]
pub(super) struct ReportListParams {
    #[serde(default = "default_limit")]
    #[param(default = 10, minimum = 1, maximum = 100)]
    pub(super) limit: i64,
    #[serde(default)]
    #[param(default = 0)]
    pub(super) offset: i64,
    #[serde(rename = "type")]
    #[param(example = "market")]
    pub(super) report_type: Option<String>,
}

pub(super) fn default_limit() -> i64 {
    10
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CreateReportRequest {
    #[schema(example = "Q3 expansion strategy")]
    pub(super) title: Option<String>,
    #[serde(rename = "type")]
    #[schema(example = "strategy")]
    pub(super) report_type: Option<String>,
    #[schema(value_type = Object)]
    pub(super) content: Option<serde_json::Value>,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct UpdateReportRequest {
    pub(super) title: Option<String>,
    #[serde(rename = "type")]
    pub(super) report_type: Option<String>,
    #[schema(value_type = Object)]
    pub(super) content: Option<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReportResponse {
    pub(super) id: Uuid,
    pub(super) user_id: Uuid,
    pub(super) title: String,
    #[serde(rename = "type")]
    pub(super) report_type: String,
    #[schema(value_type = Object)]
    pub(super) content: serde_json::Value,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
}

impl From<Report> for ReportResponse {
    fn from(report: Report) -> Self {
        Self {
            id: report.id,
            user_id: report.user_id,
            title: report.title,
            report_type: report.report_type.to_string(),
            content: report.content,
            created_at: report.created_at,
            updated_at: report.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub(super) struct CheckoutRequestBody {
    #[schema(example = "monthly")]
    pub(super) plan: String,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct ManageSubscriptionRequest {
    #[schema(example = "cancel")]
    pub(super) action: String,
}

#[derive(Deserialize, ToSchema)]
pub(super) struct ResetDailyCountRequest {
    #[schema(example = "user_2abc")]
    pub(super) external_id: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubscriptionStatusResponse {
    pub(super) is_subscribed: bool,
    #[schema(example = "free")]
    pub(super) plan: String,
    pub(super) status: Option<String>,
    pub(super) renewal_date: Option<DateTime<Utc>>,
    pub(super) cancel_at_period_end: bool,
    pub(super) daily_reports_count: i32,
    /// Absent for subscribed users.
    pub(super) daily_reports_limit: Option<i32>,
    pub(super) daily_reports_left: Option<i32>,
}

impl SubscriptionStatusResponse {
    pub(super) fn new(view: SubscriptionStatusView, usage: UsageSnapshot) -> Self {
        Self {
            is_subscribed: view.is_subscribed,
            plan: view.plan,
            status: view.status.map(|s| s.to_string()),
            renewal_date: view.renewal_date,
            cancel_at_period_end: view.cancel_at_period_end,
            daily_reports_count: usage.daily_reports_count,
            daily_reports_limit: usage.daily_reports_limit,
            daily_reports_left: usage.daily_reports_left,
        }
    }
}
