//! Gemini `generateContent` backend

use super::{sha256_hex, Completion, GenerationBackend};
use crate::config::LlmConfig;
use crate::error::{GenerationFailure, VantageError, VantageResult};
use crate::secrets::ApiKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

const PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// HTTP client for the Gemini generative-content API
pub struct GeminiBackend {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: ApiKey,
    endpoint: Url,
}

impl GeminiBackend {
    pub fn new(config: LlmConfig, api_key: ApiKey) -> VantageResult<Self> {
        let endpoint = Url::parse(&format!(
            "{}/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        ))
        .map_err(|e| VantageError::Configuration(format!("Invalid Gemini base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VantageError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_key,
            endpoint,
        })
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose());
        url
    }

    async fn make_request(&self, prompt: &str) -> Result<Completion, GenerationFailure> {
        let request_body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };
        let payload_bytes = serde_json::to_vec(&request_body).map_err(|e| {
            GenerationFailure::Transport(format!("Failed to serialize request body: {}", e))
        })?;
        let prompt_hash = sha256_hex(&payload_bytes);

        debug!(endpoint = %self.endpoint, model = %self.config.model, "Sending generateContent request");

        let start = Instant::now();
        let response = self
            .client
            .post(self.request_url())
            .header("Content-Type", "application/json")
            .body(payload_bytes)
            .send()
            .await
            .map_err(|e| {
                GenerationFailure::Transport(format!("HTTP request failed: {}", e.without_url()))
            })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            GenerationFailure::Transport(format!(
                "Failed to read response body (HTTP {}): {}",
                status.as_u16(),
                e.without_url()
            ))
        })?;
        let raw_body = String::from_utf8_lossy(&bytes).into_owned();

        if !status.is_success() {
            return Err(GenerationFailure::Transport(format!(
                "Gemini API returned HTTP {}: {}",
                status.as_u16(),
                preview(&raw_body)
            )));
        }

        let response_hash = sha256_hex(&bytes);
        let (text, usage) = extract_text(&raw_body)?;
        let usage = usage.unwrap_or_default();

        Ok(Completion {
            text,
            model: self.config.model.clone(),
            prompt_hash,
            response_hash,
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            latency_ms: start.elapsed().as_millis(),
        })
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Completion, GenerationFailure> {
        match tokio::time::timeout(timeout, self.make_request(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                let limit_ms = timeout.as_millis() as u64;
                warn!(limit_ms, model = %self.config.model, "Gemini request timed out");
                Err(GenerationFailure::Timeout { limit_ms })
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Pull the first candidate's first text part out of a response body.
fn extract_text(raw_body: &str) -> Result<(String, Option<UsageMetadata>), GenerationFailure> {
    let parsed: GenerateResponse = serde_json::from_str(raw_body).map_err(|e| {
        GenerationFailure::MalformedResponse(format!(
            "Failed to parse response JSON: {}. Body: {}",
            e,
            preview(raw_body)
        ))
    })?;

    let candidate = match parsed.candidates.first() {
        Some(candidate) => candidate,
        None => {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!(" (prompt blocked: {})", r))
                .unwrap_or_default();
            return Err(GenerationFailure::MalformedResponse(format!(
                "Response contains no candidates{}",
                reason
            )));
        }
    };

    let text = candidate
        .content
        .as_ref()
        .and_then(|c| c.parts.iter().find_map(|p| p.text.clone()))
        .filter(|t| !t.trim().is_empty());

    match text {
        Some(text) => Ok((text, parsed.usage_metadata)),
        None => {
            let message = match candidate.finish_reason.as_deref() {
                Some(reason @ ("SAFETY" | "RECITATION")) => {
                    format!("Candidate withheld by the backend (finishReason {})", reason)
                }
                Some(reason) => format!("Candidate has no text part (finishReason {})", reason),
                None => "Candidate has no text part".to_string(),
            };
            Err(GenerationFailure::MalformedResponse(message))
        }
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > PREVIEW_CHARS {
        let head: String = body.chars().take(PREVIEW_CHARS).collect();
        format!("{}... [truncated]", head)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_text_part() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "```jsx\nfunction App() {}\n```"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 30, "totalTokenCount": 42}
        }"#;
        let (text, usage) = extract_text(body).unwrap();
        assert!(text.starts_with("```jsx"));
        assert_eq!(usage.unwrap().total_token_count, Some(42));
    }

    #[test]
    fn missing_shape_is_malformed() {
        for body in [
            "not json",
            r#"{"candidates": []}"#,
            r#"{"candidates": [{"content": {"parts": []}}]}"#,
            r#"{"candidates": [{"content": {"parts": [{"text": "   "}]}}]}"#,
        ] {
            let err = extract_text(body).unwrap_err();
            assert!(
                matches!(err, GenerationFailure::MalformedResponse(_)),
                "{}: {:?}",
                body,
                err
            );
        }
    }

    #[test]
    fn safety_stop_is_malformed() {
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let err = extract_text(body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let blocked = r#"{"promptFeedback": {"blockReason": "OTHER"}}"#;
        assert!(extract_text(blocked).unwrap_err().to_string().contains("OTHER"));
    }

    #[test]
    fn request_url_carries_key_and_model() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9/v1beta/".to_string(),
            ..LlmConfig::default()
        };
        let backend = GeminiBackend::new(
            config,
            ApiKey::new("k3y", crate::secrets::KeySource::Environment),
        )
        .unwrap();
        let url = backend.request_url();
        assert_eq!(url.path(), "/v1beta/models/gemini-2.0-flash:generateContent");
        assert_eq!(url.query(), Some("key=k3y"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let body = "é".repeat(PREVIEW_CHARS + 5);
        assert!(preview(&body).ends_with("... [truncated]"));
    }
}
