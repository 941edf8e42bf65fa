use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Malformed report payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid report payload: {0}")]
    InvalidPayload(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}
