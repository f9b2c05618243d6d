use crate::application::{EntitlementTracker, QuotaEnforcement};
use crate::domain::{
    validation_message, NewReport, Report, ReportPage, ReportQuery, ReportUpdate, User,
};
use crate::infrastructure::{
    ReportRepository, RepositoryError, SubscriptionRepository, UserRepository,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Report not found: {0}")]
    NotFound(Uuid),
    #[error("{0}")]
    Validation(String),
    #[error("Daily report limit reached")]
    QuotaExceeded,
}

/// Owner-scoped report storage. Creation is metered by the entitlement tracker.
pub struct ReportService<R, U, S>
where
    R: ReportRepository,
    U: UserRepository,
    S: SubscriptionRepository,
{
    report_repo: Arc<R>,
    tracker: Arc<EntitlementTracker<U, S>>,
}

impl<R, U, S> ReportService<R, U, S>
where
    R: ReportRepository,
    U: UserRepository,
    S: SubscriptionRepository,
{
    pub fn new(report_repo: Arc<R>, tracker: Arc<EntitlementTracker<U, S>>) -> Self {
        Self {
            report_repo,
            tracker,
        }
    }

    pub async fn create(&self, user: &User, new_report: NewReport) -> Result<Report, ReportError> {
        let identity = user.identity();
        let enforcement = self.tracker.settings().enforcement;

        match enforcement {
            QuotaEnforcement::BestEffort => {
                if self.tracker.has_reached_daily_limit(&identity).await {
                    return Err(ReportError::QuotaExceeded);
                }
                new_report
                    .validate()
                    .map_err(|e| ReportError::Validation(validation_message(&e)))?;
            }
            QuotaEnforcement::Atomic => {
                // Validate first so rejected input never takes a slot.
                new_report
                    .validate()
                    .map_err(|e| ReportError::Validation(validation_message(&e)))?;
                if !self.tracker.reserve_daily_report(&identity).await {
                    return Err(ReportError::QuotaExceeded);
                }
            }
        }

        let report = Report::new(user.id, new_report);
        if let Err(e) = self.report_repo.create(&report).await {
            if enforcement == QuotaEnforcement::Atomic {
                self.tracker.release_daily_report(&identity).await;
            }
            return Err(e.into());
        }

        if enforcement == QuotaEnforcement::BestEffort {
            self.tracker.increment_daily_report_count(&identity).await;
        }

        info!(user_id = %user.id, report_id = %report.id, report_type = %report.report_type, "Report created");
        Ok(report)
    }

    pub async fn get(&self, user: &User, id: Uuid) -> Result<Report, ReportError> {
        self.report_repo
            .get_for_user(id, user.id)
            .await
            .map_err(|e| not_found(e, id))
    }

    /// Newest first. Limit is clamped to `1..=MAX_PAGE_SIZE`, offset to `>= 0`.
    pub async fn list(&self, user: &User, query: ReportQuery) -> Result<ReportPage, ReportError> {
        let query = ReportQuery {
            limit: query.limit.clamp(1, MAX_PAGE_SIZE),
            offset: query.offset.max(0),
            report_type: query.report_type,
        };

        let items = self.report_repo.list_for_user(user.id, &query).await?;
        let total = self
            .report_repo
            .count_for_user(user.id, query.report_type)
            .await?;

        Ok(ReportPage {
            items,
            limit: query.limit,
            offset: query.offset,
            total,
        })
    }

    pub async fn update(
        &self,
        user: &User,
        id: Uuid,
        update: ReportUpdate,
    ) -> Result<Report, ReportError> {
        if update.is_empty() {
            return Err(ReportError::Validation(
                "At least one of title, type or content is required".to_string(),
            ));
        }
        update
            .validate()
            .map_err(|e| ReportError::Validation(validation_message(&e)))?;

        let mut report = self.get(user, id).await?;
        report.apply(update);
        self.report_repo
            .update(&report)
            .await
            .map_err(|e| not_found(e, id))?;

        Ok(report)
    }

    pub async fn delete(&self, user: &User, id: Uuid) -> Result<(), ReportError> {
        self.report_repo
            .delete_for_user(id, user.id)
            .await
            .map_err(|e| not_found(e, id))?;

        info!(user_id = %user.id, report_id = %id, "Report deleted");
        Ok(())
    }
}

fn not_found(e: RepositoryError, id: Uuid) -> ReportError {
    match e {
        RepositoryError::NotFound(_) => ReportError::NotFound(id),
        other => ReportError::Repository(other),
    }
}
