//! Google Gemini adapter (`generateContent`).

use std::sync::Arc;

use async_trait::async_trait;
use gradeflow_core::{GradingRequest, CONNECTION_TEST_PROMPT};
use serde::{Deserialize, Serialize};

use super::{
    factory::ProviderFactory, http, GradingProvider, ProviderConfig, ProviderError, ProviderKind,
    RawResponse, TokenUsage, GRADING_MAX_TOKENS, GRADING_TEMPERATURE,
};
use crate::config::ConfigError;

/// Google Gemini provider. The key travels in the `x-goog-api-key` header,
/// never in the URL.
#[derive(Debug)]
pub struct GeminiProvider {
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        config: &ProviderConfig,
    ) -> Result<reqwest::RequestBuilder, ProviderError> {
        let credential = config
            .credential()
            .ok_or_else(|| ProviderError::Auth("Gemini API key missing".to_string()))?;
        Ok(request.header("x-goog-api-key", credential.expose()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

fn decode_generate(body: &str) -> RawResponse {
    let parsed = match serde_json::from_str::<GenerateResponse>(body) {
        Ok(parsed) => parsed,
        Err(_) => return RawResponse::new(body),
    };

    let text: Vec<String> = parsed
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        return RawResponse::new(body);
    }

    RawResponse {
        text: text.join(""),
        model: parsed.model_version,
        usage: parsed
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default(),
    }
}

#[async_trait]
impl GradingProvider for GeminiProvider {
    async fn grade(
        &self,
        request: &GradingRequest,
        config: &ProviderConfig,
    ) -> Result<RawResponse, ProviderError> {
        let prompt = http::grading_prompt(request);
        let body = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: &prompt.system,
                }],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt.user }],
            }],
            generation_config: GenerationConfig {
                temperature: GRADING_TEMPERATURE,
                max_output_tokens: GRADING_MAX_TOKENS,
            },
        };

        let url = config.url(&format!("models/{}:generateContent", config.model));
        let request = self.authorized(self.client.post(url).json(&body), config)?;
        let text = http::send(request, config).await?;
        Ok(decode_generate(&text))
    }

    async fn test_connection(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        let body = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: CONNECTION_TEST_PROMPT,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: GRADING_TEMPERATURE,
                max_output_tokens: 10,
            },
        };
        let url = config.url(&format!("models/{}:generateContent", config.model));
        let request = self.authorized(self.client.post(url).json(&body), config)?;
        http::send(request, config).await.map(|_| ())
    }

    async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<String>, ProviderError> {
        let request = self.authorized(self.client.get(config.url("models")), config)?;
        let body = http::send(request, config).await?;
        let models = serde_json::from_str::<ModelList>(&body)
            .map(|list| {
                list.models
                    .into_iter()
                    .map(|m| m.name.trim_start_matches("models/").to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    fn name(&self) -> &str {
        ProviderKind::Gemini.display_name()
    }
}

/// Factory for Gemini providers.
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError> {
        self.validate_config(config)?;
        Ok(Arc::new(GeminiProvider::new(http::build_client()?)))
    }

    fn description(&self) -> &'static str {
        "Google Gemini generateContent API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_generate() {
        let body = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Score: 8/10"}]}}],
            "usageMetadata": {"promptTokenCount": 300, "candidatesTokenCount": 12},
            "modelVersion": "gemini-pro"
        }"#;
        let raw = decode_generate(body);
        assert_eq!(raw.text, "Score: 8/10");
        assert_eq!(raw.usage.total(), 312);
        assert_eq!(raw.model.as_deref(), Some("gemini-pro"));
    }

    #[test]
    fn test_blocked_response_returns_body() {
        let body = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        assert_eq!(decode_generate(body).text, body);
    }

    #[test]
    fn test_request_uses_camel_case() {
        let body = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part { text: "sys" }],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "essay" }],
            }],
            generation_config: GenerationConfig {
                temperature: GRADING_TEMPERATURE,
                max_output_tokens: GRADING_MAX_TOKENS,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(value["systemInstruction"].get("role").is_none());
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 4096);
    }
}
