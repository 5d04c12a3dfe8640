//! Shared HTTP plumbing for the adapters.

use std::time::Duration;

use gradeflow_core::{GradingPrompt, GradingRequest};
use tracing::debug;

use super::{error_detail, parse_retry_after, ProviderConfig, ProviderError};
use crate::config::ConfigError;

pub(crate) fn build_client() -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))
}

/// Build the grading prompt for one request.
pub(crate) fn grading_prompt(request: &GradingRequest) -> GradingPrompt {
    let prompt = GradingPrompt::for_request(request);
    debug!(
        student = %request.student.id,
        prompt_bytes = prompt.byte_len(),
        "Grading prompt built"
    );
    prompt
}

/// Map a transport failure to a provider error.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_builder() {
        ProviderError::MalformedRequest(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Send a request with the config's timeout and return the body text of a
/// 2xx response.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    config: &ProviderConfig,
) -> Result<String, ProviderError> {
    let response = request
        .timeout(config.timeout)
        .send()
        .await
        .map_err(|e| transport_error(e, config.timeout))?;

    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);

    let body = response
        .text()
        .await
        .map_err(|e| transport_error(e, config.timeout))?;

    debug!(
        provider = %config.kind,
        status = status.as_u16(),
        bytes = body.len(),
        "Provider responded"
    );

    if status.is_success() {
        return Ok(body);
    }

    Err(
        match ProviderError::from_status(status.as_u16(), retry_after, error_detail(&body)) {
            ProviderError::Timeout(_) => ProviderError::Timeout(config.timeout),
            other => other,
        },
    )
}

/// Attach `Authorization: Bearer` when a credential is present.
pub(crate) fn bearer(
    request: reqwest::RequestBuilder,
    config: &ProviderConfig,
) -> reqwest::RequestBuilder {
    match config.credential() {
        Some(credential) => request.bearer_auth(credential.expose()),
        None => request,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gradeflow_core::{Rubric, Student};

    use super::*;

    #[test]
    fn test_grading_prompt_matches_core_prompt() {
        let request = GradingRequest::new(
            Student::new("s1", "An essay on tides."),
            Arc::new(Rubric::from_text("Explain the moon's role.", "Tides")),
        );
        let prompt = grading_prompt(&request);
        assert_eq!(prompt, GradingPrompt::for_request(&request));
        assert!(prompt.user.contains("An essay on tides."));
        assert!(prompt.byte_len() > "An essay on tides.".len());
    }
}
