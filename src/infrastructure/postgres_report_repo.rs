use crate::domain::{Report, ReportQuery, ReportType};
use crate::infrastructure::{ReportRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

pub struct PostgresReportRepository {
    pool: PgPool,
}

impl PostgresReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportRepository for PostgresReportRepository {
    async fn create(&self, report: &Report) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, user_id, title, report_type, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(report.id)
        .bind(report.user_id)
        .bind(&report.title)
        .bind(report.report_type.to_string())
        .bind(&report.content)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_for_user(&self, id: Uuid, user_id: Uuid) -> Result<Report, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, title, report_type, content, created_at, updated_at
            FROM reports
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Report {}", id)),
            _ => RepositoryError::DatabaseError(e),
        })?;

        row_to_report(&row)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        query: &ReportQuery,
    ) -> Result<Vec<Report>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, report_type, content, created_at, updated_at
            FROM reports
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR report_type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(query.report_type.map(|t| t.to_string()))
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_report).collect()
    }

    async fn count_for_user(
        &self,
        user_id: Uuid,
        report_type: Option<ReportType>,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM reports
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR report_type = $2)
            "#,
        )
        .bind(user_id)
        .bind(report_type.map(|t| t.to_string()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn update(&self, report: &Report) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE reports
            SET title = $1, report_type = $2, content = $3, updated_at = $4
            WHERE id = $5 AND user_id = $6
            "#,
        )
        .bind(&report.title)
        .bind(report.report_type.to_string())
        .bind(&report.content)
        .bind(report.updated_at)
        .bind(report.id)
        .bind(report.user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Report {}", report.id)));
        }

        Ok(())
    }

    async fn delete_for_user(&self, id: Uuid, user_id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM reports
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Report {}", id)));
        }

        Ok(())
    }
}

fn row_to_report(row: &sqlx::postgres::PgRow) -> Result<Report, RepositoryError> {
    let type_str: String = row.try_get("report_type")?;
    let report_type = ReportType::from_str(&type_str)
        .map_err(|_| RepositoryError::InvalidData(format!("Unknown report type: {}", type_str)))?;

    Ok(Report {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        report_type,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
