use crate::application::{
    AccountError, AnalysisError, BillingError, EntitlementError, ReportError,
};
use crate::infrastructure::{BillingProviderError, RepositoryError};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use serde_json::{json, Value};

pub(super) fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "message": message.into() })
}

pub(super) fn success(message: impl Into<String>) -> Value {
    json!({ "success": true, "message": message.into() })
}

pub(super) fn unauthenticated() -> (StatusCode, Value) {
    (StatusCode::UNAUTHORIZED, failure("User not authenticated"))
}

/// Extractor rejections keep axum's status and text inside the usual envelope.
pub(super) fn json_rejection(rejection: JsonRejection) -> (StatusCode, Value) {
    (rejection.status(), failure(rejection.body_text()))
}

pub(super) fn query_rejection(rejection: QueryRejection) -> (StatusCode, Value) {
    (rejection.status(), failure(rejection.body_text()))
}

pub(super) fn path_rejection(rejection: PathRejection) -> (StatusCode, Value) {
    (rejection.status(), failure(rejection.body_text()))
}

pub(super) fn map_account_error(err: &AccountError) -> (StatusCode, Value) {
    match err {
        AccountError::InvalidIdentity(_) => unauthenticated(),
        AccountError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Failed to load user"),
        ),
    }
}

pub(super) fn map_entitlement_error(err: &EntitlementError) -> (StatusCode, Value) {
    match err {
        EntitlementError::UserNotFound(_) => (StatusCode::NOT_FOUND, failure("User not found")),
        EntitlementError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Failed to reset daily count"),
        ),
    }
}

pub(super) fn map_billing_error(err: &BillingError) -> (StatusCode, Value) {
    match err {
        BillingError::NoActiveSubscription => (
            StatusCode::NOT_FOUND,
            failure("No active subscription found"),
        ),
        BillingError::Provider(BillingProviderError::InvalidSignature(_)) => (
            StatusCode::BAD_REQUEST,
            failure("Invalid webhook signature"),
        ),
        BillingError::Provider(BillingProviderError::InvalidPayload(_)) => (
            StatusCode::BAD_REQUEST,
            failure("Invalid webhook payload"),
        ),
        BillingError::Provider(BillingProviderError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            failure("Rate limited by billing provider, please retry"),
        ),
        BillingError::Provider(BillingProviderError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            failure("Subscription not found at billing provider"),
        ),
        BillingError::Provider(_) => (
            StatusCode::BAD_GATEWAY,
            failure("Billing provider request failed"),
        ),
        BillingError::Integrity(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Webhook could not be reconciled"),
        ),
        BillingError::InvalidConfig(_) | BillingError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Billing request failed"),
        ),
    }
}

pub(super) fn map_report_error(err: &ReportError, free_daily_limit: i32) -> (StatusCode, Value) {
    match err {
        ReportError::Validation(msg) => (StatusCode::BAD_REQUEST, failure(msg.as_str())),
        ReportError::NotFound(_) | ReportError::Repository(RepositoryError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, failure("Report not found"))
        }
        ReportError::QuotaExceeded => (
            StatusCode::FORBIDDEN,
            failure(format!(
                "You have reached your daily limit of {} free reports. Please upgrade to a paid plan for unlimited reports.",
                free_daily_limit
            )),
        ),
        ReportError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Report request failed"),
        ),
    }
}

pub(super) fn map_analysis_error(err: &AnalysisError) -> (StatusCode, Value) {
    match err {
        AnalysisError::MissingFields(_) => (StatusCode::BAD_REQUEST, failure(err.to_string())),
        AnalysisError::QuotaExceeded => (StatusCode::TOO_MANY_REQUESTS, failure(err.to_string())),
        AnalysisError::Generation { fallback, .. } => (
            StatusCode::BAD_GATEWAY,
            json!({
                "success": false,
                "message": "Failed to generate analysis",
                "fallbackReport": fallback,
            }),
        ),
        AnalysisError::Repository(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            failure("Internal server error occurred while generating analysis"),
        ),
    }
}
