pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;

pub use analysis::{
    build_prompt, create_backend, select_model, AnalysisBackend, AnalysisError,
    DisabledAnalysisClient, GeminiAnalysisClient, Priority, ANALYSIS_FAILED_MARKER,
    ANALYSIS_UNAVAILABLE,
};
pub use config::TriageConfig;
pub use db::{PgReportStore, ReportStore};
pub use error::TriageError;
pub use models::report::{BugReportRecord, IncomingReport, UNKNOWN_ERROR_PLACEHOLDER};
pub use queue::{RedisQueue, ReportQueue};
