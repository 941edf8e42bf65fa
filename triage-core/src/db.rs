use crate::config::DatabaseConfig;
use crate::error::TriageError;
use crate::models::report::BugReportRecord;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::future::Future;
use std::time::Duration;

/// Matches the table created by earlier deployments, so it is safe to run on
/// every start.
pub const CREATE_BUG_REPORTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS bug_reports (
        id SERIAL PRIMARY KEY,
        error_message TEXT,
        ai_analysis TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

const INSERT_BUG_REPORT: &str = r#"
    INSERT INTO bug_reports (error_message, ai_analysis)
    VALUES ($1, $2)
    RETURNING id, error_message, ai_analysis, created_at
"#;

/// Durable storage for analyzed reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Create the report table if it is missing.
    async fn ensure_schema(&self) -> Result<(), TriageError>;

    /// Store one analyzed report as a single committed row.
    async fn insert(
        &self,
        error_message: &str,
        analysis: &str,
    ) -> Result<BugReportRecord, TriageError>;
}

/// Postgres-backed store. Each operation opens its own connection and closes
/// it when done; nothing is pooled.
#[derive(Debug, Clone)]
pub struct PgReportStore {
    options: PgConnectOptions,
    timeout: Duration,
}

impl PgReportStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self::with_options(
            config.connect_options(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn with_options(options: PgConnectOptions, timeout: Duration) -> Self {
        Self { options, timeout }
    }

    async fn connect(&self) -> Result<PgConnection, TriageError> {
        Ok(PgConnection::connect_with(&self.options).await?)
    }

    pub async fn health_check(&self) -> Result<String, TriageError> {
        bounded("health check", self.timeout, async {
            let mut conn = self.connect().await?;
            let row: (String,) = sqlx::query_as("SELECT version()")
                .fetch_one(&mut conn)
                .await?;
            conn.close().await?;
            Ok(row.0)
        })
        .await
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn ensure_schema(&self) -> Result<(), TriageError> {
        bounded("schema creation", self.timeout, async {
            let mut conn = self.connect().await?;
            sqlx::query(CREATE_BUG_REPORTS_TABLE)
                .execute(&mut conn)
                .await?;
            conn.close().await?;
            Ok(())
        })
        .await
    }

    async fn insert(
        &self,
        error_message: &str,
        analysis: &str,
    ) -> Result<BugReportRecord, TriageError> {
        bounded("report insert", self.timeout, async {
            let mut conn = self.connect().await?;

            let mut tx = conn.begin().await?;
            let record: BugReportRecord = sqlx::query_as(INSERT_BUG_REPORT)
                .bind(error_message)
                .bind(analysis)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;

            conn.close().await?;
            Ok(record)
        })
        .await
    }
}

/// Run `fut` under `limit`. An expired limit drops the future, which drops the
/// connection and rolls back any open transaction.
async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, TriageError>
where
    F: Future<Output = Result<T, TriageError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TriageError::Timeout {
            operation,
            secs: limit.as_secs(),
        })?
}
