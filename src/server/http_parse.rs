use crate::domain::{AnalysisKind, ReportType, SubscriptionPlan};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SubscriptionAction {
    Cancel,
    Reactivate,
}

pub(super) fn parse_report_type(report_type: &str) -> Option<ReportType> {
    ReportType::from_str(report_type).ok()
}

pub(super) fn parse_plan(plan: &str) -> Option<SubscriptionPlan> {
    SubscriptionPlan::from_str(plan).ok()
}

pub(super) fn parse_analysis_kind(kind: &str) -> Option<AnalysisKind> {
    match kind {
        "strategy" | "generate-report" => Some(AnalysisKind::Strategy),
        "market" | "market-intelligence" => Some(AnalysisKind::Market),
        "financial" | "financial-analysis" => Some(AnalysisKind::Financial),
        "operations" | "operations-analysis" => Some(AnalysisKind::Operations),
        _ => None,
    }
}

pub(super) fn parse_subscription_action(action: &str) -> Option<SubscriptionAction> {
    match action {
        "cancel" => Some(SubscriptionAction::Cancel),
        "reactivate" => Some(SubscriptionAction::Reactivate),
        _ => None,
    }
}
