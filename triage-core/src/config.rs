use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

/// Flat environment variables understood by existing deployments, mapped onto
/// their config keys. These win over every other source.
const DEPLOYMENT_ENV: &[(&str, &str)] = &[
    ("REDIS_HOST", "queue.host"),
    ("REDIS_PORT", "queue.port"),
    ("QUEUE_NAME", "queue.name"),
    ("DB_HOST", "database.host"),
    ("DB_PORT", "database.port"),
    ("DB_NAME", "database.name"),
    ("DB_USER", "database.user"),
    ("DB_PASS", "database.password"),
    ("GEMINI_API_KEY", "analysis.api_key"),
];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriageConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    /// Server-side blocking window of a single pop command.
    pub poll_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            host: "redis_queue".to_string(),
            port: 6379,
            name: "raw_bugs_queue".to_string(),
            poll_timeout_secs: 5,
            reconnect_delay_secs: 2,
        }
    }
}

impl QueueConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/0", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "postgres_db".to_string(),
            port: 5432,
            name: "bugtracker".to_string(),
            user: "buguser".to_string(),
            password: "bugpassword".to_string(),
            timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user)
            .password(&self.password)
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Empty disables the AI provider entirely.
    pub api_key: String,
    pub base_url: String,
    /// Candidate models, best first. The first one the provider lists wins.
    pub model_preference: Vec<String>,
    /// Used when the listing succeeds but contains none of the candidates.
    pub fallback_model: String,
    /// Used when the listing itself fails.
    pub default_model: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model_preference: vec![
                "gemini-2.0-flash-lite".to_string(),
                "gemini-1.5-pro".to_string(),
            ],
            fallback_model: "gemini-pro".to_string(),
            default_model: "gemini-1.5-flash".to_string(),
            timeout_secs: 60,
        }
    }
}

// Hand-written so the key never ends up in logs.
impl std::fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("model_preference", &self.model_preference)
            .field("fallback_model", &self.fallback_model)
            .field("default_model", &self.default_model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub startup_delay_secs: u64,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl TriageConfig {
    /// Load defaults, then `path` if it exists, then the process environment.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Same as [`TriageConfig::load`] with an explicit environment.
    pub fn load_with_env(path: &str, env: Map<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("TRIAGE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("analysis.model_preference")
                    .source(Some(env.clone())),
            );

        for (var, key) in DEPLOYMENT_ENV {
            builder = builder.set_override_option(*key, env.get(*var).cloned())?;
        }

        builder.build()?.try_deserialize()
    }
}
