use crate::application::{EntitlementTracker, QuotaEnforcement};
use crate::domain::{AnalysisKind, AnalysisParameters, NewReport, Report, User};
use crate::infrastructure::{
    AnalysisGenerator, GeneratorError, ReportRepository, RepositoryError, SubscriptionRepository,
    UserRepository,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("Daily analysis limit reached. Please upgrade your plan or try again tomorrow.")]
    QuotaExceeded,
    #[error("Analysis generation failed: {source}")]
    Generation {
        source: GeneratorError,
        /// Locally built placeholder the caller can show instead.
        fallback: Value,
    },
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Metered pipeline: validate, check quota, generate, persist.
pub struct AnalysisService<R, U, S, G>
where
    R: ReportRepository,
    U: UserRepository,
    S: SubscriptionRepository,
    G: AnalysisGenerator,
{
    report_repo: Arc<R>,
    tracker: Arc<EntitlementTracker<U, S>>,
    generator: Arc<G>,
}

impl<R, U, S, G> AnalysisService<R, U, S, G>
where
    R: ReportRepository,
    U: UserRepository,
    S: SubscriptionRepository,
    G: AnalysisGenerator,
{
    pub fn new(
        report_repo: Arc<R>,
        tracker: Arc<EntitlementTracker<U, S>>,
        generator: Arc<G>,
    ) -> Self {
        Self {
            report_repo,
            tracker,
            generator,
        }
    }

    /// Run one analysis and store it as a report.
    ///
    /// A failed generation does not count against the quota.
    pub async fn run(
        &self,
        user: &User,
        kind: AnalysisKind,
        parameters: AnalysisParameters,
    ) -> Result<Report, AnalysisError> {
        let missing = kind.missing_fields(&parameters);
        if !missing.is_empty() {
            return Err(AnalysisError::MissingFields(missing));
        }

        let identity = user.identity();
        let enforcement = self.tracker.settings().enforcement;
        let allowed = match enforcement {
            QuotaEnforcement::BestEffort => !self.tracker.has_reached_daily_limit(&identity).await,
            QuotaEnforcement::Atomic => self.tracker.reserve_daily_report(&identity).await,
        };
        if !allowed {
            info!(user_id = %user.id, kind = %kind, "Analysis rejected by daily limit");
            return Err(AnalysisError::QuotaExceeded);
        }

        let analysis = match self
            .generator
            .generate(kind.system_prompt(), &kind.prompt(&parameters))
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(user_id = %user.id, kind = %kind, error = %e, "Analysis generation failed");
                if enforcement == QuotaEnforcement::Atomic {
                    self.tracker.release_daily_report(&identity).await;
                }
                return Err(AnalysisError::Generation {
                    fallback: kind.placeholder_report(&parameters, Utc::now()),
                    source: e,
                });
            }
        };

        let now = Utc::now();
        let analysis_id = kind.analysis_id(now);
        let title = kind.report_title(&parameters);

        let mut report = Report::new(
            user.id,
            NewReport {
                title,
                report_type: kind.report_type(),
                content: json!({
                    "analysis": analysis,
                    "requestParameters": parameters,
                    "generatedAt": now.to_rfc3339(),
                    "analysisId": analysis_id,
                }),
            },
        );
        report.created_at = now;
        report.updated_at = now;

        self.report_repo.create(&report).await?;

        if enforcement == QuotaEnforcement::BestEffort {
            self.tracker.increment_daily_report_count(&identity).await;
        }

        info!(
            user_id = %user.id,
            report_id = %report.id,
            analysis_id = %analysis_id,
            "Analysis completed"
        );
        Ok(report)
    }
}
