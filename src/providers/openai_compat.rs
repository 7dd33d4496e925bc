//! OpenAI-compatible chat completions adapter.
//!
//! Groq, OpenRouter and Mistral all expose `POST {base}/chat/completions`
//! with bearer auth and the OpenAI request/response shape, so one adapter
//! covers them; the presets only differ in base URL and default model.
//!
//! Supported operations: `complete`, plus `vision` when enabled with
//! [`OpenAiCompatibleAdapter::with_vision()`] (images are sent inline as
//! base64 data URLs).
//!
//! Request parameters honoured: `model`, `temperature` (default 0),
//! `max_tokens`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::retry::reclassify_rate_limit;
use super::traits::ProviderAdapter;
use crate::error::is_rate_limit_message;
use crate::types::{OperationKind, Payload, ProviderResponse, Request, Usage};
use crate::{HuginnError, Result};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_MODEL: &str = "deepseek/deepseek-chat";
const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
const MISTRAL_MODEL: &str = "codestral-latest";

/// Client for any OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    vision: bool,
    http: Client,
}

impl OpenAiCompatibleAdapter {
    /// Create an adapter for an arbitrary endpoint.
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            vision: false,
            http: Client::new(),
        }
    }

    /// Groq with its default model.
    pub fn groq(api_key: impl Into<String>) -> Self {
        Self::new("groq", api_key, GROQ_BASE_URL, GROQ_MODEL)
    }

    /// OpenRouter with its default model.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", api_key, OPENROUTER_BASE_URL, OPENROUTER_MODEL)
    }

    /// Mistral with its default model.
    pub fn mistral(api_key: impl Into<String>) -> Self {
        Self::new("mistral", api_key, MISTRAL_BASE_URL, MISTRAL_MODEL)
    }

    /// Point the adapter at a different base URL (for testing with wiremock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Change the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Declare that the model accepts image inputs.
    pub fn with_vision(mut self, enabled: bool) -> Self {
        self.vision = enabled;
        self
    }

    fn build_message(request: &Request) -> Result<ChatMessage> {
        match request.payload() {
            Payload::Text(text) => Ok(ChatMessage {
                role: "user",
                content: MessageContent::Text(text.clone()),
            }),
            Payload::Structured(value) => Ok(ChatMessage {
                role: "user",
                content: MessageContent::Text(value.to_string()),
            }),
            Payload::TextWithImages { text, images } => {
                let mut parts = vec![ContentPart::Text { text: text.clone() }];
                parts.extend(images.iter().map(|image| ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{}", STANDARD.encode(image)),
                    },
                }));
                Ok(ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(parts),
                })
            }
            Payload::Binary(_) => Err(HuginnError::ProviderRejected(
                "chat completions cannot take a raw binary payload".into(),
            )),
        }
    }

    /// Check response status and map to the appropriate error.
    async fn handle_response_errors(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        let err = match status.as_u16() {
            400 | 422 => HuginnError::ProviderRejected(body),
            401 | 403 if !is_rate_limit_message(&body) => HuginnError::AuthenticationFailed,
            413 => HuginnError::PayloadTooLarge,
            429 => HuginnError::RateLimited { retry_after },
            code => HuginnError::Api {
                status: code,
                message: body,
            },
        };
        Err(reclassify_rate_limit(err))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, operation: OperationKind) -> bool {
        match operation {
            OperationKind::Complete => true,
            OperationKind::Vision => self.vision,
            OperationKind::ImageGeneration => false,
        }
    }

    async fn invoke(&self, request: &Request) -> Result<ProviderResponse> {
        let model = request
            .parameter("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: vec![Self::build_message(request)?],
            temperature: request
                .parameter("temperature")
                .and_then(|t| t.as_f64())
                .unwrap_or(0.0),
            max_tokens: request
                .parameter("max_tokens")
                .and_then(|t| t.as_i64())
                .and_then(|t| u32::try_from(t).ok()),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))?;
        let response = Self::handle_response_errors(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(HuginnError::EmptyResponse)?;

        let mut result = ProviderResponse::new(content)
            .with_model(parsed.model.unwrap_or_else(|| model.to_string()));
        if let Some(usage) = parsed.usage {
            result = result.with_usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }
        Ok(result)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
