//! Analysis module: asks a Gemini model to diagnose an error report.
//!
//! Provides an `AnalysisBackend` trait with implementations for:
//! - **Gemini** — model chosen once at startup from the provider's model listing
//! - **Disabled** — no API key configured, every call returns [`ANALYSIS_UNAVAILABLE`]
//!
//! `analyze` never fails: provider errors come back as text starting with
//! [`ANALYSIS_FAILED_MARKER`] and get stored like any other diagnosis.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::AnalysisConfig;

/// Analysis text used when no API key is configured.
pub const ANALYSIS_UNAVAILABLE: &str = "Analysis unavailable: no AI provider API key configured.";

/// Prefix of the analysis text stored when the provider call fails.
pub const ANALYSIS_FAILED_MARKER: &str = "AI analysis failed:";

const API_KEY_HEADER: &str = "x-goog-api-key";
const GENERATE_CONTENT: &str = "generateContent";
const MODEL_PAGE_SIZE: &str = "1000";
const MAX_MODEL_PAGES: usize = 20;

// ============================================================================
// AnalysisBackend trait
// ============================================================================

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Diagnose an error given its breadcrumbs. Always yields text.
    async fn analyze(&self, error_message: &str, breadcrumbs: &[Value]) -> String;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Create the analysis backend for this process.
///
/// An empty API key selects [`DisabledAnalysisClient`]; otherwise the Gemini
/// model listing is consulted once to pick a model.
pub async fn create_backend(
    config: &AnalysisConfig,
) -> Result<Box<dyn AnalysisBackend>, AnalysisError> {
    if config.api_key.is_empty() {
        tracing::warn!("No Gemini API key configured — AI analysis disabled");
        return Ok(Box::new(DisabledAnalysisClient));
    }

    Ok(Box::new(GeminiAnalysisClient::connect(config.clone()).await?))
}

// ============================================================================
// Priority / prompt
// ============================================================================

/// Severity levels the model is asked to choose from, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the diagnosis prompt. Same input, same prompt.
pub fn build_prompt(error_message: &str, breadcrumbs: &[Value]) -> String {
    let context = serde_json::to_string_pretty(breadcrumbs).unwrap_or_else(|_| "[]".to_string());
    let priorities = Priority::ALL
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(" / ");

    format!(
        "You are an expert at debugging applications (Java/C#/Web).
Analyze the error and the logs below.

ERROR: {error_message}

RECENT LOGS (context):
{context}

Your task is to find the cause.
Answer ONLY in plain text (no markdown), briefly, in exactly this format:

CAUSE: <one sentence describing what went wrong>
FIX: <a concrete recommendation for fixing it in code>
PRIORITY: <{priorities}>
"
    )
}

// ============================================================================
// Model selection
// ============================================================================

/// Pick the first entry of `preference` present in `available`.
///
/// Provider listings name models `models/<id>`; both forms match. Falls back
/// to `fallback` when nothing preferred is available.
pub fn select_model(available: &[String], preference: &[String], fallback: &str) -> String {
    preference
        .iter()
        .find(|candidate| {
            available
                .iter()
                .any(|name| name.strip_prefix("models/").unwrap_or(name) == candidate.as_str())
        })
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response contained no text")]
    EmptyResponse,
}

impl AnalysisError {
    fn from_request(e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            AnalysisError::Timeout { secs: timeout_secs }
        } else {
            AnalysisError::Http(e.without_url())
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

/// Decode a Gemini response body, turning non-2xx statuses into `Api` errors.
async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout_secs: u64,
) -> Result<T, AnalysisError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AnalysisError::from_request(e, timeout_secs))?;

    if !status.is_success() {
        let (code, message) = serde_json::from_str::<GeminiErrorResponse>(&body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| (e.code, e.message))
            .unwrap_or((status.as_u16(), body));

        tracing::error!(code = code, message = %message, "Gemini API error");

        return Err(AnalysisError::Api { code, message });
    }

    serde_json::from_str(&body).map_err(|e| AnalysisError::MalformedResponse(e.to_string()))
}

// ============================================================================
// GeminiAnalysisClient
// ============================================================================

/// Gemini analysis client. The model is fixed at construction.
#[derive(Debug, Clone)]
pub struct GeminiAnalysisClient {
    client: Client,
    config: AnalysisConfig,
    model: String,
}

impl GeminiAnalysisClient {
    /// Build a client, selecting the model from the provider's listing.
    ///
    /// A failed listing is logged and `default_model` is used instead; only
    /// HTTP client construction can fail here.
    pub async fn connect(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = build_http_client(&config)?;

        tracing::info!("Checking available Gemini models...");
        let model = match list_generation_models(&client, &config).await {
            Ok(available) => {
                tracing::info!(models = ?available, "Available Gemini models");
                select_model(&available, &config.model_preference, &config.fallback_model)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    model = %config.default_model,
                    "Listing Gemini models failed — using default model"
                );
                config.default_model.clone()
            }
        };

        tracing::info!(model = %model, "Selected Gemini model");

        Ok(Self {
            client,
            config,
            model,
        })
    }

    /// Build a client for a known model without consulting the listing.
    pub fn with_model(config: AnalysisConfig, model: impl Into<String>) -> Result<Self, AnalysisError> {
        Ok(Self {
            client: build_http_client(&config)?,
            config,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single generation request; returns the candidate text unmodified.
    pub async fn generate(&self, prompt: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/models/{}:{}",
            self.config.base_url, self.model, GENERATE_CONTENT
        );

        let request = GenerateRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::from_request(e, self.config.timeout_secs))?;

        let body: GenerateResponse = read_json(response, self.config.timeout_secs).await?;

        body.into_text().ok_or(AnalysisError::EmptyResponse)
    }
}

fn build_http_client(config: &AnalysisConfig) -> Result<Client, AnalysisError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(AnalysisError::Http)
}

/// Names of all models supporting `generateContent`, across every listing page.
async fn list_generation_models(
    client: &Client,
    config: &AnalysisConfig,
) -> Result<Vec<String>, AnalysisError> {
    let url = format!("{}/models", config.base_url);
    let mut names = Vec::new();
    let mut page_token: Option<String> = None;

    for _ in 0..MAX_MODEL_PAGES {
        let mut request = client
            .get(&url)
            .header(API_KEY_HEADER, &config.api_key)
            .query(&[("pageSize", MODEL_PAGE_SIZE)]);
        if let Some(token) = &page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::from_request(e, config.timeout_secs))?;
        let page: ListModelsResponse = read_json(response, config.timeout_secs).await?;

        names.extend(
            page.models
                .into_iter()
                .filter(|m| {
                    m.supported_generation_methods
                        .iter()
                        .any(|method| method == GENERATE_CONTENT)
                })
                .map(|m| m.name),
        );

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    Ok(names)
}

#[async_trait]
impl AnalysisBackend for GeminiAnalysisClient {
    async fn analyze(&self, error_message: &str, breadcrumbs: &[Value]) -> String {
        let prompt = build_prompt(error_message, breadcrumbs);

        match self.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "Gemini analysis failed");
                format!("{} {}", ANALYSIS_FAILED_MARKER, e)
            }
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// DisabledAnalysisClient
// ============================================================================

/// Used when no API key is configured. Never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnalysisClient;

#[async_trait]
impl AnalysisBackend for DisabledAnalysisClient {
    async fn analyze(&self, _error_message: &str, _breadcrumbs: &[Value]) -> String {
        ANALYSIS_UNAVAILABLE.to_string()
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ============================================================================
// TESTS
// ============================================================================
