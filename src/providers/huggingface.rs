//! HuggingFace Inference API adapter for text-to-image generation.
//!
//! Uses the serverless `POST {base}/models/{model}` endpoint, which answers
//! with raw image bytes. See: <https://huggingface.co/docs/api-inference/index>
//!
//! Request parameters honoured:
//! - `model`: a short alias (see [`MODEL_ALIASES`]) or a full model id
//! - `style`: a preset appended to the prompt (see [`STYLE_PRESETS`])
//! - `negative_prompt`, `width`, `height`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::retry::reclassify_rate_limit;
use super::traits::ProviderAdapter;
use crate::error::is_rate_limit_message;
use crate::types::{OperationKind, ProviderResponse, Request, ResponsePayload};
use crate::{HuginnError, Result};

/// Default base URL for HuggingFace Inference API
const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

const DEFAULT_NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, deformed, ugly, bad anatomy, \
     watermark, signature, text, worst quality, low res";

const DEFAULT_SIZE: u32 = 1024;

/// Short names accepted in the `model` parameter.
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("sdxl", "stabilityai/stable-diffusion-xl-base-1.0"),
    ("sd2", "stabilityai/stable-diffusion-2-1"),
    ("openjourney", "prompthero/openjourney"),
    ("realistic", "SG161222/Realistic_Vision_V5.1_noVAE"),
    ("anime", "Linaqruf/animagine-xl-3.0"),
];

/// Prompt suffixes selected with the `style` parameter.
pub const STYLE_PRESETS: &[(&str, &str)] = &[
    (
        "realistic",
        "photorealistic, ultra detailed, 8k, professional photography",
    ),
    (
        "artistic",
        "artistic, oil painting, masterpiece, dramatic lighting",
    ),
    ("anime", "anime style, manga, vibrant colors, detailed"),
    ("cyberpunk", "cyberpunk, neon lights, futuristic, dark atmosphere"),
    ("fantasy", "fantasy art, magical, ethereal, detailed environment"),
    ("minimalist", "minimalist, clean, simple, modern"),
];

/// Client for the HuggingFace text-to-image inference endpoint.
#[derive(Clone)]
pub struct HuggingFaceAdapter {
    api_key: String,
    http: Client,
    base_url: String,
    model: String,
}

impl HuggingFaceAdapter {
    /// Create a new adapter with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Point the adapter at a different base URL (for testing with wiremock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Change the default model (alias or full id).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = resolve_model(&model.into()).to_string();
        self
    }

    /// Prompt with the optional style preset and quality boosters applied.
    fn build_prompt(prompt: &str, style: Option<&str>) -> String {
        let styled = match style.and_then(style_suffix) {
            Some(suffix) => format!("{prompt}, {suffix}"),
            None => prompt.to_string(),
        };
        format!("masterpiece, best quality, {styled}, sharp focus, high resolution")
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
            503 => HuginnError::Api {
                status: 503,
                message: "Model is loading, please retry".to_string(),
            },
            code => HuginnError::Api {
                status: code,
                message: format!("HuggingFace API error: {status}: {body}"),
            },
        };
        Err(reclassify_rate_limit(err))
    }
}

/// Expand a model alias; unknown names are passed through as full ids.
pub fn resolve_model(model: &str) -> &str {
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(model))
        .map_or(model, |(_, id)| *id)
}

fn style_suffix(style: &str) -> Option<&'static str> {
    STYLE_PRESETS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(style))
        .map(|(_, suffix)| *suffix)
}

fn dimension(request: &Request, name: &str) -> Result<u32> {
    match request.parameter(name) {
        None => Ok(DEFAULT_SIZE),
        Some(value) => value
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                HuginnError::MalformedRequest(format!("{name} must be a positive integer"))
            }),
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn supports(&self, operation: OperationKind) -> bool {
        operation == OperationKind::ImageGeneration
    }

    async fn invoke(&self, request: &Request) -> Result<ProviderResponse> {
        let prompt = request.normalized_text().ok_or_else(|| {
            HuginnError::ProviderRejected("image generation needs a text prompt".into())
        })?;
        let model = request
            .parameter("model")
            .and_then(|m| m.as_str())
            .map_or(self.model.as_str(), resolve_model);
        let style = request.parameter("style").and_then(|s| s.as_str());

        let body = TextToImageRequest {
            inputs: Self::build_prompt(&prompt, style),
            parameters: TextToImageParameters {
                negative_prompt: request
                    .parameter("negative_prompt")
                    .and_then(|n| n.as_str())
                    .unwrap_or(DEFAULT_NEGATIVE_PROMPT),
                width: dimension(request, "width")?,
                height: dimension(request, "height")?,
            },
        };

        let response = self
            .http
            .post(format!("{}/models/{}", self.base_url, model))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))?;
        let response = Self::handle_response_errors(response).await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))?;
        if bytes.is_empty() {
            return Err(HuginnError::EmptyResponse);
        }

        Ok(ProviderResponse::new(ResponsePayload::Binary(bytes.to_vec())).with_model(model))
    }
}

#[derive(Serialize)]
struct TextToImageRequest<'a> {
    inputs: String,
    parameters: TextToImageParameters<'a>,
}

#[derive(Serialize)]
struct TextToImageParameters<'a> {
    negative_prompt: &'a str,
    width: u32,
    height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_expand_and_full_ids_pass_through() {
        assert_eq!(resolve_model("sdxl"), "stabilityai/stable-diffusion-xl-base-1.0");
        assert_eq!(resolve_model("ANIME"), "Linaqruf/animagine-xl-3.0");
        assert_eq!(resolve_model("acme/custom-model"), "acme/custom-model");
    }

    #[test]
    fn style_is_appended_before_boosters() {
        let prompt = HuggingFaceAdapter::build_prompt("a fox", Some("cyberpunk"));
        assert_eq!(
            prompt,
            "masterpiece, best quality, a fox, cyberpunk, neon lights, futuristic, \
             dark atmosphere, sharp focus, high resolution"
        );
    }

    #[test]
    fn unknown_style_is_ignored() {
        let prompt = HuggingFaceAdapter::build_prompt("a fox", Some("baroque"));
        assert_eq!(
            prompt,
            "masterpiece, best quality, a fox, sharp focus, high resolution"
        );
    }
}
