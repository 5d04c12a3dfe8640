//! Runtime and provider configuration.
//!
//! Settings are read from YAML or JSON. Durations are written as humantime
//! strings (`"500ms"`, `"2m"`, `"24h"`). Credentials may come from the
//! settings file or the provider's environment variable and are never
//! serialized back out.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use gradeflow_core::{FeedbackStyle, GradingMode, DEFAULT_TOTAL_MARKS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::{ApiCredential, ProviderConfig, ProviderError, ProviderKind};

/// Configuration errors. Raised before any grading call is made.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
}

impl ConfigError {
    /// Classify a failed connection test.
    pub fn from_preflight(err: ProviderError) -> Self {
        match err {
            ProviderError::Auth(detail) => ConfigError::InvalidCredential(detail),
            ProviderError::MalformedRequest(detail) => ConfigError::Invalid(detail),
            other => ConfigError::Unreachable(other.to_string()),
        }
    }
}

/// Humantime (de)serialization for `Duration`.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Humantime (de)serialization for `Option<Duration>`.
pub(crate) mod opt_duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Backoff schedule between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "duration_str")]
    pub min_delay: Duration,

    #[serde(with = "duration_str")]
    pub max_delay: Duration,

    /// Randomize delays to spread retries from concurrent workers
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Orchestration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum provider calls in flight per session
    pub concurrency: usize,

    pub retry: RetryConfig,

    /// Idle time after which a finished session is evicted
    #[serde(with = "duration_str")]
    pub session_retention: Duration,

    /// Target total when the rubric declares no maximum
    pub default_total_marks: f64,

    pub mode: GradingMode,
    pub feedback_style: FeedbackStyle,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryConfig::default(),
            session_retention: Duration::from_secs(24 * 60 * 60),
            default_total_marks: DEFAULT_TOTAL_MARKS,
            mode: GradingMode::default(),
            feedback_style: FeedbackStyle::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry.min_delay ({}) exceeds retry.max_delay ({})",
                humantime::format_duration(self.retry.min_delay),
                humantime::format_duration(self.retry.max_delay)
            )));
        }
        if !self.default_total_marks.is_finite() || self.default_total_marks <= 0.0 {
            return Err(ConfigError::Invalid(
                "default_total_marks must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-provider overrides in a settings file.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    pub endpoint: Option<String>,
    pub model: Option<String>,

    #[serde(skip_serializing)]
    api_key: Option<String>,

    #[serde(with = "opt_duration_str", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    pub max_retries: Option<u32>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Settings file: runtime options plus provider selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub runtime: RuntimeConfig,

    /// Active provider
    pub provider: Option<ProviderKind>,

    pub providers: BTreeMap<ProviderKind, ProviderEntry>,
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.runtime.validate()?;
        Ok(settings)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.runtime.validate()?;
        Ok(settings)
    }

    /// Load settings; `.json` files are JSON, anything else YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Config for the active provider.
    pub fn active_provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let kind = self.provider.ok_or_else(|| {
            ConfigError::Invalid("no provider selected: set 'provider' in settings".to_string())
        })?;
        Ok(self.provider_config(kind))
    }

    /// Build a [`ProviderConfig`] for `kind`: defaults, then overrides from
    /// the settings file, then the credential (settings, else environment).
    pub fn provider_config(&self, kind: ProviderKind) -> ProviderConfig {
        let entry = self.providers.get(&kind).cloned().unwrap_or_default();
        let mut config = ProviderConfig::new(kind);

        if let Some(endpoint) = entry.endpoint.filter(|e| !e.trim().is_empty()) {
            config = config.with_endpoint(endpoint);
        }
        if let Some(model) = entry.model.filter(|m| !m.trim().is_empty()) {
            config = config.with_model(model);
        }
        if let Some(timeout) = entry.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(max_retries) = entry.max_retries {
            config = config.with_max_retries(max_retries);
        }
        if let Some(credential) = ApiCredential::resolve(
            entry.api_key.as_deref(),
            kind.credential_env(),
            kind.credential_name(),
        ) {
            config = config.with_credential(credential);
        }
        config
    }
}
