//! Ollama adapter (`/api/generate`).

use std::sync::Arc;

use async_trait::async_trait;
use gradeflow_core::GradingRequest;
use serde::{Deserialize, Serialize};

use super::{
    factory::ProviderFactory, http, GradingProvider, ProviderConfig, ProviderError, ProviderKind,
    RawResponse, TokenUsage, GRADING_MAX_TOKENS, GRADING_TEMPERATURE,
};
use crate::config::ConfigError;

/// Local Ollama server. No credential.
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn tags(&self, config: &ProviderConfig) -> Result<Vec<String>, ProviderError> {
        let body = http::send(self.client.get(config.url("api/tags")), config).await?;
        Ok(serde_json::from_str::<TagList>(&body)
            .map(|list| list.models.into_iter().map(|m| m.name).collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

fn decode_generate(body: &str) -> RawResponse {
    match serde_json::from_str::<GenerateResponse>(body) {
        Ok(parsed) => RawResponse {
            text: parsed.response,
            model: parsed.model,
            usage: TokenUsage::new(parsed.prompt_eval_count, parsed.eval_count),
        },
        Err(_) => RawResponse::new(body),
    }
}

#[async_trait]
impl GradingProvider for OllamaProvider {
    async fn grade(
        &self,
        request: &GradingRequest,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let prompt = http::grading_prompt(request);
        let body = GenerateRequest {
            model: &config.model,
            system: &prompt.system,
            prompt: &prompt.user,
            stream: false,
            options: GenerateOptions {
                temperature: GRADING_TEMPERATURE,
                num_predict: GRADING_MAX_TOKENS,
            },
        };
        let text = http::send(
            self.client.post(config.url("api/generate")).json(&body),
            config,
        )
        .await?;
        Ok(decode_generate(&text))
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        self.tags(config).await.map(|_| ())
    }

    async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<String>, ProviderError> {
        self.tags(config).await
    }

    fn name(&self) -> &str {
        ProviderKind::Ollama.display_name()
    }
}

/// Factory for Ollama providers.
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError> {
        self.validate_config(config)?;
        Ok(Arc::new(OllamaProvider::new(http::build_client()?)))
    }

    fn description(&self) -> &'static str {
        "Ollama local models"
    }
}
