use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub report_type: ReportType,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportType {
    Strategy,
    Market,
    Financial,
    Operations,
}

impl ReportType {
    pub fn allowed() -> Vec<String> {
        ReportType::iter().map(|t| t.to_string()).collect()
    }
}

#[derive(Debug, Clone, Validate)]
pub struct NewReport {
    #[validate(length(
        min = 3,
        max = 100,
        message = "Title must be between 3 and 100 characters"
    ))]
    pub title: String,
    pub report_type: ReportType,
    #[validate(custom = "validate_json_object")]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Default, Validate)]
pub struct ReportUpdate {
    #[validate(length(
        min = 3,
        max = 100,
        message = "Title must be between 3 and 100 characters"
    ))]
    pub title: Option<String>,
    pub report_type: Option<ReportType>,
    #[validate(custom = "validate_json_object")]
    pub content: Option<serde_json::Value>,
}

impl ReportUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.report_type.is_none() && self.content.is_none()
    }
}

fn validate_json_object(value: &serde_json::Value) -> Result<(), ValidationError> {
    if value.is_object() {
        return Ok(());
    }
    let mut err = ValidationError::new("json_object");
    err.message = Some(Cow::Borrowed("Content must be a valid JSON object"));
    Err(err)
}

/// Flattens validator output into one user-facing sentence per failed field.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by_key(|(field, _)| *field);

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("Invalid {}", field),
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl Report {
    pub fn new(user_id: Uuid, new_report: NewReport) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: new_report.title,
            report_type: new_report.report_type,
            content: new_report.content,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, update: ReportUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(report_type) = update.report_type {
            self.report_type = report_type;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportQuery {
    pub limit: i64,
    pub offset: i64,
    pub report_type: Option<ReportType>,
}

impl Default for ReportQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            report_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportPage {
    pub items: Vec<Report>,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}
