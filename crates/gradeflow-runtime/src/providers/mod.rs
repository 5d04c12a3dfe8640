//! Grading provider abstractions.
//!
//! This module defines the [`GradingProvider`] trait every backend
//! implements, the per-job [`ProviderConfig`], and the error taxonomy the
//! orchestrator's retry policy understands. Adapters for concrete backends
//! are compiled behind cargo features.
//!
//! ## Security
//!
//! Credentials live in [`ApiCredential`] and are only exposed at the point
//! an HTTP header is set.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use gradeflow_core::GradingRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

mod factory;
pub mod secrets;

#[cfg(any(
    feature = "anthropic",
    feature = "openai",
    feature = "gemini",
    feature = "local"
))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "gemini")]
mod gemini;
#[cfg(feature = "local")]
mod ollama;
#[cfg(any(feature = "openai", feature = "local"))]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};
#[cfg(feature = "gemini")]
pub use gemini::{GeminiProvider, GeminiProviderFactory};
#[cfg(feature = "local")]
pub use ollama::{OllamaProvider, OllamaProviderFactory};
#[cfg(any(feature = "openai", feature = "local"))]
pub use openai::{OpenAiCompatibleFactory, OpenAiCompatibleProvider};

/// Sampling temperature for grading calls.
pub const GRADING_TEMPERATURE: f32 = 0.3;

/// Output token ceiling for grading calls.
pub const GRADING_MAX_TOKENS: u32 = 4096;

/// Retries after the first attempt when none are configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
    Generic,
}

impl ProviderKind {
    /// Every kind, in catalogue order.
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::Ollama,
            ProviderKind::LmStudio,
            ProviderKind::Generic,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::Generic => "generic",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic Claude",
            ProviderKind::Gemini => "Google Gemini",
            ProviderKind::Ollama => "Ollama",
            ProviderKind::LmStudio => "LM Studio",
            ProviderKind::Generic => "Generic (OpenAI-compatible)",
        }
    }

    /// Whether grading calls cannot be made without a credential.
    pub fn requires_key(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::Anthropic | ProviderKind::Gemini
        )
    }

    /// Whether the backend runs on the local machine.
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama | ProviderKind::LmStudio)
    }

    /// Default endpoint; `generic` has none and must be configured.
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            ProviderKind::Ollama => Some("http://localhost:11434"),
            ProviderKind::LmStudio => Some("http://localhost:1234/v1"),
            ProviderKind::Generic => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Gemini => "gemini-pro",
            ProviderKind::Ollama => "llama2",
            ProviderKind::LmStudio => "local-model",
            ProviderKind::Generic => "default",
        }
    }

    /// Local inference is slower, so it gets a longer timeout.
    pub fn default_timeout(&self) -> Duration {
        if self.is_local() || *self == ProviderKind::Generic {
            Duration::from_secs(300)
        } else {
            Duration::from_secs(120)
        }
    }

    /// Environment variable consulted for the credential.
    pub fn credential_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Generic => Some("GENERIC_API_KEY"),
            ProviderKind::Ollama | ProviderKind::LmStudio => None,
        }
    }

    /// Human-readable credential name for error messages.
    pub fn credential_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI API key",
            ProviderKind::Anthropic => "Anthropic API key",
            ProviderKind::Gemini => "Gemini API key",
            ProviderKind::Generic => "Generic provider API key",
            ProviderKind::Ollama => "Ollama API key",
            ProviderKind::LmStudio => "LM Studio API key",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(ProviderKind::LmStudio),
            "generic" | "custom" => Ok(ProviderKind::Generic),
            other => Err(ConfigError::Invalid(format!(
                "unknown provider '{}' (expected one of: {})",
                other,
                ProviderKind::all()
                    .iter()
                    .map(ProviderKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Connection settings for one job.
///
/// Shared read-only behind an `Arc` for the job's duration. `Debug` never
/// shows the credential.
#[derive(Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Base URL, without a trailing path for the call
    pub endpoint: String,

    pub model: String,

    /// Per-call timeout
    pub timeout: Duration,

    /// Retries after the first attempt for transient errors
    pub max_retries: u32,

    credential: Option<ApiCredential>,
}

impl ProviderConfig {
    /// Config with the kind's defaults and no credential.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            endpoint: kind.default_endpoint().unwrap_or_default().to_string(),
            model: kind.default_model().to_string(),
            timeout: kind.default_timeout(),
            max_retries: DEFAULT_MAX_RETRIES,
            credential: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_credential(mut self, credential: ApiCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Attach a key supplied by the caller.
    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        let name = self.kind.credential_name();
        self.with_credential(ApiCredential::new(key, CredentialSource::Caller, name))
    }

    /// Credential, if one was supplied and is non-empty.
    pub fn credential(&self) -> Option<&ApiCredential> {
        self.credential.as_ref().filter(|c| !c.is_empty())
    }

    /// Full URL for a path below the endpoint.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }

    /// Check the config without contacting the backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} requires an endpoint URL",
                self.kind.display_name()
            )));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "endpoint must start with http:// or https://, got '{}'",
                self.endpoint
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        if self.kind.requires_key() && self.credential().is_none() {
            let hint = self
                .kind
                .credential_env()
                .map(|env| format!(": set 'api_key' in settings or {}", env))
                .unwrap_or_default();
            return Err(ConfigError::InvalidCredential(format!(
                "{} required{}",
                self.kind.credential_name(),
                hint
            )));
        }
        Ok(())
    }
}

/// Category of a provider failure, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Network,
    Auth,
    RateLimit,
    Timeout,
    MalformedRequest,
}

/// Errors from grading providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited{}: {detail}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited {
        retry_after: Option<Duration>,
        detail: String,
    },

    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Network(_) => ProviderErrorKind::Network,
            ProviderError::Auth(_) => ProviderErrorKind::Auth,
            ProviderError::RateLimited { .. } => ProviderErrorKind::RateLimit,
            ProviderError::Timeout(_) => ProviderErrorKind::Timeout,
            ProviderError::MalformedRequest(_) => ProviderErrorKind::MalformedRequest,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ProviderErrorKind::Network | ProviderErrorKind::Timeout | ProviderErrorKind::RateLimit
        )
    }

    /// Map a non-2xx HTTP status to an error.
    pub fn from_status(status: u16, retry_after: Option<Duration>, detail: String) -> Self {
        let detail = if detail.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, detail)
        };
        match status {
            401 | 403 => ProviderError::Auth(detail),
            429 => ProviderError::RateLimited {
                retry_after,
                detail,
            },
            408 | 504 => ProviderError::Timeout(Duration::ZERO),
            500..=599 => ProviderError::Network(detail),
            _ => ProviderError::MalformedRequest(detail),
        }
    }
}

/// Parse a `retry-after` header given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extract a readable message from an error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is truncated to a short excerpt.
pub fn error_detail(body: &str) -> String {
    const MAX_EXCERPT: usize = 200;

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value["error"]["message"]
            .as_str()
            .or_else(|| value["error"].as_str())
            .or_else(|| value["message"].as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_EXCERPT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Join a base URL and a path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Text produced by one model call for one student.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub text: String,

    /// Model that answered, when the backend reports it
    pub model: Option<String>,

    pub usage: TokenUsage,
}

impl RawResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A grading backend.
///
/// Implementations translate a [`GradingRequest`] into one model call and
/// return the model's text untouched; parsing belongs to the normalizer.
#[async_trait]
pub trait GradingProvider: Send + Sync {
    /// Grade one student.
    async fn grade(
        &self,
        request: &GradingRequest,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError>;

    /// One lightweight round-trip to prove the config works.
    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), ProviderError>;

    /// Models the backend offers, where it can list them.
    async fn list_models(&self, _config: &ProviderConfig) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Provider name recorded on results.
    fn name(&self) -> &str;
}
