use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored as `error_message` when a report arrives without one.
pub const UNKNOWN_ERROR_PLACEHOLDER: &str = "unknown error";

/// Error report as pushed onto the queue by the ingest API.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingReport {
    pub error_message: String,
    pub breadcrumbs: Vec<Value>,
}

/// Row of the `bug_reports` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BugReportRecord {
    pub id: i32,
    pub error_message: String,
    pub ai_analysis: String,
    pub created_at: NaiveDateTime,
}
