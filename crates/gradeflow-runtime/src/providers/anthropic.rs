//! Anthropic Claude adapter (Messages API).

use std::sync::Arc;

use async_trait::async_trait;
use gradeflow_core::{GradingRequest, CONNECTION_TEST_PROMPT};
use serde::{Deserialize, Serialize};

use super::{
    factory::ProviderFactory, http, GradingProvider, ProviderConfig, ProviderError, ProviderKind,
    RawResponse, TokenUsage, GRADING_MAX_TOKENS, GRADING_TEMPERATURE,
};
use crate::config::ConfigError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude provider.
#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn messages(
        &self,
        body: &MessagesRequest<'_>,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let credential = config
            .credential()
            .ok_or_else(|| ProviderError::Auth("Anthropic API key missing".to_string()))?;

        // Only expose the credential here, at the point of use
        let request = self
            .client
            .post(config.url("messages"))
            .header("x-api-key", credential.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);

        let text = http::send(request, config).await?;
        Ok(decode_messages(&text))
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn decode_messages(body: &str) -> RawResponse {
    match serde_json::from_str::<MessagesResponse>(body) {
        Ok(parsed) if parsed.content.iter().any(|b| b.text.is_some()) => RawResponse {
            text: parsed
                .content
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join(""),
            model: parsed.model,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
        },
        _ => RawResponse::new(body),
    }
}

#[async_trait]
impl GradingProvider for AnthropicProvider {
    async fn grade(
        &self,
        request: &GradingRequest,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let prompt = http::grading_prompt(request);
        let body = MessagesRequest {
            model: &config.model,
            max_tokens: GRADING_MAX_TOKENS,
            system: Some(&prompt.system),
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
            temperature: GRADING_TEMPERATURE,
        };
        self.messages(&body, config).await
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let body = MessagesRequest {
            model: &config.model,
            max_tokens: 10,
            system: None,
            messages: vec![Message {
                role: "user",
                content: CONNECTION_TEST_PROMPT,
            }],
            temperature: GRADING_TEMPERATURE,
        };
        self.messages(&body, config).await.map(|_| ())
    }

    fn name(&self) -> &str {
        ProviderKind::Anthropic.display_name()
    }
}

/// Factory for Anthropic providers.
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError> {
        self.validate_config(config)?;
        Ok(Arc::new(AnthropicProvider::new(http::build_client()?)))
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude Messages API"
    }
}
