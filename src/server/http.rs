use super::http_auth::{identity_from_headers, is_admin_authorized};
use super::http_errors::{
    failure, json_rejection, map_account_error, map_analysis_error, map_billing_error,
    map_entitlement_error, map_report_error, path_rejection, query_rejection, success,
    unauthenticated,
};
use super::http_parse::{
    parse_analysis_kind, parse_plan, parse_report_type, parse_subscription_action,
    SubscriptionAction,
};
use super::http_types::{
    CheckoutRequestBody, CreateReportRequest, HealthResponse, ManageSubscriptionRequest,
    ReportListParams, ReportResponse, ResetDailyCountRequest, SubscriptionStatusResponse,
    UpdateReportRequest,
};
use super::state::AppState;
use crate::application::UsageSnapshot;
use crate::domain::{NewReport, ReportQuery, ReportType, ReportUpdate, User, UserIdentity};
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/user/subscription-status", get(subscription_status))
        .route("/user/reset-daily-count", post(reset_daily_count))
        .route("/billing/checkout", post(create_checkout))
        .route("/billing/subscription", post(manage_subscription))
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/reports", get(list_reports).post(create_report))
        .route(
            "/reports/:id",
            get(get_report).put(update_report).delete(delete_report),
        )
        .route(
            "/analyses/:kind",
            get(analysis_capabilities).post(run_analysis),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        subscription_status,
        reset_daily_count,
        create_checkout,
        manage_subscription,
        stripe_webhook,
        list_reports,
        create_report,
        get_report,
        update_report,
        delete_report,
        analysis_capabilities,
        run_analysis,
    ),
    components(
        schemas(
            HealthResponse,
            SubscriptionStatusResponse,
            ResetDailyCountRequest,
            CheckoutRequestBody,
            ManageSubscriptionRequest,
            CreateReportRequest,
            UpdateReportRequest,
            ReportResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "User", description = "Plan and quota status"),
        (name = "Billing", description = "Checkout, subscription management and webhooks"),
        (name = "Reports", description = "Report storage"),
        (name = "Analyses", description = "Metered analysis generation"),
    ),
    info(
        title = "Analysis Desk API",
        version = "0.1.0",
        description = "Business-analysis reports with a free daily quota and paid subscriptions",
        license(name = "MIT")
    )
)]
struct ApiDoc;

type HandlerError = (StatusCode, Json<Value>);

fn reject((status, body): (StatusCode, Value)) -> HandlerError {
    (status, Json(body))
}

/// Resolve the gateway identity and make sure the user row exists.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, HandlerError> {
    let identity = identity_from_headers(headers, state.auth_gateway_token.as_deref())
        .ok_or_else(|| reject(unauthenticated()))?;

    state.accounts.ensure_user(&identity).await.map_err(|e| {
        error!(external_id = %identity.external_id, error = %e, "Failed to ensure user");
        reject(map_account_error(&e))
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

/// Current plan and remaining free reports for the signed-in user
#[utoipa::path(
    get,
    path = "/user/subscription-status",
    tag = "User",
    responses(
        (status = 200, description = "Plan and quota status", body = SubscriptionStatusResponse),
        (status = 401, description = "User not authenticated", body = Object)
    )
)]
async fn subscription_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let view = state.billing.subscription_status(&user).await;
    let usage = match state.entitlement.usage(&user.identity()).await {
        Ok(usage) => usage,
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to load daily usage");
            let limit = state.entitlement.settings().free_daily_limit;
            UsageSnapshot {
                daily_reports_count: 0,
                daily_reports_limit: Some(limit),
                daily_reports_left: Some(limit),
            }
        }
    };

    (
        StatusCode::OK,
        Json(json!(SubscriptionStatusResponse::new(view, usage))),
    )
}

/// Clear a user's free-tier counter (admin only)
#[utoipa::path(
    post,
    path = "/user/reset-daily-count",
    tag = "User",
    request_body = ResetDailyCountRequest,
    responses(
        (status = 200, description = "Counter reset", body = Object),
        (status = 401, description = "Missing or invalid admin token", body = Object),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn reset_daily_count(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ResetDailyCountRequest>, JsonRejection>,
) -> impl IntoResponse {
    if !is_admin_authorized(&headers, state.admin_token.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(failure("Missing or invalid admin token")),
        );
    }

    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return reject(json_rejection(rejection)),
    };

    match state
        .entitlement
        .reset_daily_count(&UserIdentity::new(req.external_id))
        .await
    {
        Ok(previous) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Daily report count reset",
                "previousCount": previous,
            })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to reset daily count");
            reject(map_entitlement_error(&e))
        }
    }
}

#[utoipa::path(
    post,
    path = "/billing/checkout",
    tag = "Billing",
    request_body = CheckoutRequestBody,
    responses(
        (status = 200, description = "Checkout session created", body = Object),
        (status = 400, description = "Invalid plan", body = Object),
        (status = 401, description = "User not authenticated", body = Object),
        (status = 502, description = "Billing provider request failed", body = Object)
    )
)]
async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CheckoutRequestBody>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return reject(json_rejection(rejection)),
    };

    let plan = match parse_plan(req.plan.as_str()) {
        Some(p) => p,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Invalid plan",
                    "allowed": ["monthly", "yearly"]
                })),
            );
        }
    };

    match state.billing.create_checkout(&user, plan).await {
        Ok(url) => (StatusCode::OK, Json(json!({ "success": true, "url": url }))),
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to create checkout session");
            reject(map_billing_error(&e))
        }
    }
}

/// Cancel at period end, or undo a pending cancellation
#[utoipa::path(
    post,
    path = "/billing/subscription",
    tag = "Billing",
    request_body = ManageSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription updated", body = Object),
        (status = 400, description = "Invalid action", body = Object),
        (status = 404, description = "No active subscription", body = Object)
    )
)]
async fn manage_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ManageSubscriptionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return reject(json_rejection(rejection)),
    };

    let result = match parse_subscription_action(req.action.as_str()) {
        Some(SubscriptionAction::Cancel) => state.billing.cancel(&user).await,
        Some(SubscriptionAction::Reactivate) => state.billing.reactivate(&user).await,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": "Invalid action",
                    "allowed": ["cancel", "reactivate"]
                })),
            );
        }
    };

    match result {
        Ok(subscription) => {
            let message = if subscription.cancel_at_period_end {
                "Subscription will be canceled at the end of the billing period"
            } else {
                "Subscription reactivated successfully"
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": message,
                    "cancelAtPeriodEnd": subscription.cancel_at_period_end,
                    "currentPeriodEnd": subscription.current_period_end,
                })),
            )
        }
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Subscription update failed");
            reject(map_billing_error(&e))
        }
    }
}

/// Billing provider webhook
///
/// The raw body is verified against the `Stripe-Signature` header before any
/// state is touched.
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "Billing",
    request_body(content = String, description = "Raw event payload"),
    responses(
        (status = 200, description = "Event applied", body = Object),
        (status = 400, description = "Missing or invalid signature", body = Object),
        (status = 500, description = "Event could not be reconciled", body = Object)
    )
)]
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(failure("Missing Stripe-Signature header")),
            );
        }
    };

    match state.billing.handle_webhook(&body, signature).await {
        Ok(event_type) => {
            info!(event_type = %event_type, "Webhook processed");
            (
                StatusCode::OK,
                Json(success("Webhook processed successfully")),
            )
        }
        Err(e) => reject(map_billing_error(&e)),
    }
}

#[utoipa::path(
    get,
    path = "/reports",
    tag = "Reports",
    params(ReportListParams),
    responses(
        (status = 200, description = "Page of the user's reports", body = Object),
        (status = 400, description = "Invalid report type", body = Object),
        (status = 401, description = "User not authenticated", body = Object)
    )
)]
async fn list_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<ReportListParams>, QueryRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Query(params) = match params {
        Ok(q) => q,
        Err(rejection) => return reject(query_rejection(rejection)),
    };

    let report_type = match params.report_type.as_deref() {
        None => None,
        Some(t) => match parse_report_type(t) {
            Some(t) => Some(t),
            None => return invalid_report_type(t),
        },
    };

    let query = ReportQuery {
        limit: params.limit,
        offset: params.offset,
        report_type,
    };

    match state.reports.list(&user, query).await {
        Ok(page) => {
            let items: Vec<ReportResponse> = page.items.into_iter().map(Into::into).collect();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": items,
                    "pagination": {
                        "limit": page.limit,
                        "offset": page.offset,
                        "total": page.total,
                    }
                })),
            )
        }
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Failed to list reports");
            reject(map_report_error(&e, state.entitlement.settings().free_daily_limit))
        }
    }
}

fn invalid_report_type(given: &str) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(failure(format!(
            "Invalid report type: '{}'. Valid types are: {}",
            given,
            ReportType::allowed().join(", ")
        ))),
    )
}

#[utoipa::path(
    post,
    path = "/reports",
    tag = "Reports",
    request_body = CreateReportRequest,
    responses(
        (status = 201, description = "Report created", body = Object),
        (status = 400, description = "Validation failed", body = Object),
        (status = 401, description = "User not authenticated", body = Object),
        (status = 403, description = "Daily limit reached", body = Object)
    )
)]
async fn create_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateReportRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return reject(json_rejection(rejection)),
    };

    let (title, type_str, content) = match (req.title, req.report_type, req.content) {
        (Some(title), Some(t), Some(content)) => (title, t, content),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(failure(
                    "Missing required fields: title, type, and content are required",
                )),
            );
        }
    };

    let report_type = match parse_report_type(&type_str) {
        Some(t) => t,
        None => return invalid_report_type(&type_str),
    };

    let new_report = NewReport {
        title,
        report_type,
        content,
    };

    match state.reports.create(&user, new_report).await {
        Ok(report) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Report created successfully",
                "data": ReportResponse::from(report),
            })),
        ),
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "Report creation rejected");
            reject(map_report_error(&e, state.entitlement.settings().free_daily_limit))
        }
    }
}

#[utoipa::path(
    get,
    path = "/reports/{id}",
    tag = "Reports",
    params(("id" = Uuid, Path, description = "Report ID")),
    responses(
        (status = 200, description = "Report found", body = Object),
        (status = 404, description = "Report not found", body = Object)
    )
)]
async fn get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Path(id) = match id {
        Ok(p) => p,
        Err(rejection) => return reject(path_rejection(rejection)),
    };

    match state.reports.get(&user, id).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": ReportResponse::from(report) })),
        ),
        Err(e) => reject(map_report_error(&e, state.entitlement.settings().free_daily_limit)),
    }
}

#[utoipa::path(
    put,
    path = "/reports/{id}",
    tag = "Reports",
    params(("id" = Uuid, Path, description = "Report ID")),
    request_body = UpdateReportRequest,
    responses(
        (status = 200, description = "Report updated", body = Object),
        (status = 400, description = "Validation failed", body = Object),
        (status = 404, description = "Report not found", body = Object)
    )
)]
async fn update_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateReportRequest>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Path(id) = match id {
        Ok(p) => p,
        Err(rejection) => return reject(path_rejection(rejection)),
    };

    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => return reject(json_rejection(rejection)),
    };

    let report_type = match req.report_type.as_deref() {
        None => None,
        Some(t) => match parse_report_type(t) {
            Some(t) => Some(t),
            None => return invalid_report_type(t),
        },
    };

    let update = ReportUpdate {
        title: req.title,
        report_type,
        content: req.content,
    };

    match state.reports.update(&user, id, update).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Report updated successfully",
                "data": ReportResponse::from(report),
            })),
        ),
        Err(e) => reject(map_report_error(&e, state.entitlement.settings().free_daily_limit)),
    }
}

#[utoipa::path(
    delete,
    path = "/reports/{id}",
    tag = "Reports",
    params(("id" = Uuid, Path, description = "Report ID")),
    responses(
        (status = 200, description = "Report deleted", body = Object),
        (status = 404, description = "Report not found", body = Object)
    )
)]
async fn delete_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Path(id) = match id {
        Ok(p) => p,
        Err(rejection) => return reject(path_rejection(rejection)),
    };

    match state.reports.delete(&user, id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(success("Report deleted successfully")),
        ),
        Err(e) => reject(map_report_error(&e, state.entitlement.settings().free_daily_limit)),
    }
}

/// Analysis types and required fields for a kind
#[utoipa::path(
    get,
    path = "/analyses/{kind}",
    tag = "Analyses",
    params(("kind" = String, Path, description = "Analysis kind")),
    responses(
        (status = 200, description = "Catalog for the kind", body = Object),
        (status = 404, description = "Unknown analysis kind", body = Object)
    )
)]
async fn analysis_capabilities(Path(kind): Path<String>) -> impl IntoResponse {
    match parse_analysis_kind(&kind) {
        Some(kind) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": kind.capabilities() })),
        ),
        None => unknown_analysis_kind(&kind),
    }
}

fn unknown_analysis_kind(given: &str) -> HandlerError {
    (
        StatusCode::NOT_FOUND,
        Json(failure(format!("Unknown analysis kind: {}", given))),
    )
}

/// Generate and store an analysis
///
/// `kind` is one of `strategy`, `market`, `financial` or `operations`. The
/// body is a flat JSON object of request parameters.
#[utoipa::path(
    post,
    path = "/analyses/{kind}",
    tag = "Analyses",
    params(("kind" = String, Path, description = "Analysis kind")),
    request_body(content = Object, description = "Analysis parameters"),
    responses(
        (status = 200, description = "Analysis generated and stored", body = Object),
        (status = 400, description = "Missing required parameters", body = Object),
        (status = 404, description = "Unknown analysis kind", body = Object),
        (status = 429, description = "Daily limit reached", body = Object),
        (status = 502, description = "Generation failed; fallback report included", body = Object)
    )
)]
async fn run_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let kind = match parse_analysis_kind(&kind) {
        Some(k) => k,
        None => return unknown_analysis_kind(&kind),
    };

    let parameters = match body {
        Ok(Json(Value::Object(map))) => map,
        Err(rejection) => return reject(json_rejection(rejection)),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(failure("Request body must be a JSON object")),
            );
        }
    };

    match state.analyses.run(&user, kind, parameters).await {
        Ok(report) => {
            let analysis_id = report.content["analysisId"].clone();
            let analysis = report.content["analysis"].clone();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": format!("{} generated successfully", kind.label()),
                    "data": {
                        "analysis": analysis,
                        "analysisId": analysis_id,
                        "report": ReportResponse::from(report),
                    }
                })),
            )
        }
        Err(e) => reject(map_analysis_error(&e)),
    }
}
