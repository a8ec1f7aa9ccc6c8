use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::warn;

use crate::config::AppConfig;
use crate::content::GenerationInput;
use crate::error::ServiceError;
use crate::gemini::types::{
    ApiErrorResponse, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    InlineData, RequestContent, RequestPart,
};

// Matches the behaviour the frontend was tuned against: high temperature for
// caption variety, capped output so the response stays parseable.
const TEMPERATURE: f64 = 0.9;
const TOP_P: f64 = 0.95;
const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Seam between the request handlers and the generative model. One call in,
/// raw model text out; implementations make at most one network attempt.
#[async_trait]
pub trait CaptionModel: Send + Sync {
    async fn generate(&self, input: &GenerationInput, prompt: &str)
    -> Result<String, ServiceError>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
        })
    }

    /// Fire a trivial "Hello" request to see whether the configured key is
    /// accepted. Used once at startup; failures are reported, not fatal.
    pub async fn validate_api_key(&self) -> bool {
        let probe = GenerationInput::TextBrief(String::new());
        match self.call(&probe, "Hello").await {
            Ok(_) => true,
            Err(err) => {
                warn!(%err, "Gemini API key validation failed");
                false
            }
        }
    }

    async fn call(&self, input: &GenerationInput, prompt: &str) -> Result<String, ServiceError> {
        let mut parts = vec![RequestPart::Text(prompt.to_string())];
        if let GenerationInput::Image { bytes, mime_type } = input {
            parts.push(RequestPart::InlineData(InlineData {
                mime_type: mime_type.clone(),
                data: STANDARD.encode(bytes),
            }));
        }

        let request = GenerateContentRequest {
            contents: vec![RequestContent { parts }],
            generation_config: Some(GenerationConfig {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            }),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ServiceError::UpstreamTimeout
                } else {
                    // without_url: the URL carries the API key.
                    ServiceError::Upstream(err.without_url().to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                ServiceError::UpstreamTimeout
            } else {
                ServiceError::Upstream(err.without_url().to_string())
            }
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or_else(|_| "unrecognized error body".to_string());
            return Err(ServiceError::Upstream(format!("status {status}: {detail}")));
        }

        let decoded: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|err| ServiceError::Upstream(format!("undecodable response body: {err}")))?;

        let text: String = decoded
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ServiceError::Upstream(
                "response contained no text candidates".to_string(),
            ));
        }

        Ok(text)
    }
}

#[async_trait]
impl CaptionModel for GeminiClient {
    async fn generate(
        &self,
        input: &GenerationInput,
        prompt: &str,
    ) -> Result<String, ServiceError> {
        self.call(input, prompt).await
    }
}
