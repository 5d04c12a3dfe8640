//! OpenAI chat-completions adapter.
//!
//! Serves OpenAI itself, LM Studio and any OpenAI-compatible server.

use std::sync::Arc;

use async_trait::async_trait;
use gradeflow_core::{GradingRequest, CONNECTION_TEST_PROMPT};
use serde::{Deserialize, Serialize};

use super::{
    factory::ProviderFactory, http, ChatMessage, GradingProvider, ProviderConfig, ProviderError,
    ProviderKind, RawResponse, TokenUsage, GRADING_MAX_TOKENS, GRADING_TEMPERATURE,
};
use crate::config::ConfigError;

/// Adapter for `/chat/completions` endpoints.
#[derive(Debug)]
pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(kind: ProviderKind, client: reqwest::Client) -> Self {
        Self { kind, client }
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let body = ChatRequest {
            model: &config.model,
            messages,
            temperature: GRADING_TEMPERATURE,
            max_tokens,
        };
        let request = http::bearer(
            self.client.post(config.url("chat/completions")).json(&body),
            config,
        );
        let text = http::send(request, config).await?;
        Ok(decode_chat(&text))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Decode a completion envelope; undecodable bodies are returned whole.
fn decode_chat(body: &str) -> RawResponse {
    match serde_json::from_str::<ChatResponse>(body) {
        Ok(parsed) => match parsed.choices.into_iter().next().and_then(|c| c.message.content) {
            Some(text) => RawResponse {
                text,
                model: parsed.model,
                usage: parsed
                    .usage
                    .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
                    .unwrap_or_default(),
            },
            None => RawResponse::new(body),
        },
        Err(_) => RawResponse::new(body),
    }
}

#[async_trait]
impl GradingProvider for OpenAiCompatibleProvider {
    async fn grade(
        &self,
        request: &GradingRequest,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let prompt = http::grading_prompt(request);
        let messages = vec![ChatMessage::system(prompt.system), ChatMessage::user(prompt.user)];
        self.chat(messages, GRADING_MAX_TOKENS, config).await
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        match self.list_models(config).await {
            Ok(_) => Ok(()),
            // Some compatible servers have no model listing; fall back to a
            // minimal completion.
            Err(ProviderError::MalformedRequest(_)) if self.kind != ProviderKind::OpenAi => self
                .chat(vec![ChatMessage::user(CONNECTION_TEST_PROMPT)], 5, config)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        }
    }

    async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<String>, ProviderError> {
        let request = http::bearer(self.client.get(config.url("models")), config);
        let body = http::send(request, config).await?;
        let models = serde_json::from_str::<ModelList>(&body)
            .map(|list| list.data.into_iter().map(|m| m.id).collect())
            .unwrap_or_default();
        Ok(models)
    }

    fn name(&self) -> &str {
        self.kind.display_name()
    }
}

/// Factory for OpenAI, LM Studio and generic OpenAI-compatible providers.
pub struct OpenAiCompatibleFactory {
    kind: ProviderKind,
}

impl OpenAiCompatibleFactory {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

impl ProviderFactory for OpenAiCompatibleFactory {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError> {
        self.validate_config(config)?;
        Ok(Arc::new(OpenAiCompatibleProvider::new(
            self.kind,
            http::build_client()?,
        )))
    }

    fn description(&self) -> &'static str {
        match self.kind {
            ProviderKind::OpenAi => "OpenAI chat completions",
            ProviderKind::LmStudio => "LM Studio local server",
            _ => "Any OpenAI-compatible endpoint",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chat() {
        let body = r#"{
            "model": "gpt-4o-2024",
            "choices": [{"message": {"role": "assistant", "content": "{\"score\": 90}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }"#;
        let raw = decode_chat(body);
        assert_eq!(raw.text, r#"{"score": 90}"#);
        assert_eq!(raw.model.as_deref(), Some("gpt-4o-2024"));
        assert_eq!(raw.usage.total(), 150);
    }

    #[test]
    fn test_undecodable_envelope_returned_whole() {
        let body = "Score: 70/100";
        assert_eq!(decode_chat(body).text, body);

        let empty_choices = r#"{"choices": []}"#;
        assert_eq!(decode_chat(empty_choices).text, empty_choices);
    }

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "local-model",
            messages: vec![ChatMessage::system("s"), ChatMessage::user("u")],
            temperature: GRADING_TEMPERATURE,
            max_tokens: GRADING_MAX_TOKENS,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "local-model");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["max_tokens"], 4096);
    }

    #[test]
    fn test_factory_requires_endpoint_for_generic() {
        let factory = OpenAiCompatibleFactory::new(ProviderKind::Generic);
        assert!(factory.create(&ProviderConfig::new(ProviderKind::Generic)).is_err());

        let config = ProviderConfig::new(ProviderKind::Generic).with_endpoint("http://10.0.0.5:8000/v1");
        let provider = factory.create(&config).unwrap();
        assert_eq!(provider.name(), "Generic (OpenAI-compatible)");
    }
}
