use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;

pub const DEFAULT_STABILITY_API_URL: &str =
    "https://api.stability.ai/v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image";
pub const DEFAULT_STYLE_PRESET: &str = "fantasy-art";

/// Renders one illustration from a prompt and a seed.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, seed: i64) -> anyhow::Result<Vec<u8>>;
}

/// Offline engine: returns a 1x1 transparent PNG for every prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopImageGenerator;

const BLANK_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[async_trait]
impl ImageGenerator for NoopImageGenerator {
    async fn generate(&self, prompt: &str, seed: i64) -> anyhow::Result<Vec<u8>> {
        tracing::debug!(engine = "noop", seed, prompt_chars = prompt.len(), "image generate");
        Ok(BLANK_PNG.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub api_key: String,
    pub api_url: String,
    pub style_preset: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct StabilityImageGenerator {
    client: reqwest::Client,
    config: StabilityConfig,
}

impl StabilityImageGenerator {
    pub fn new(config: StabilityConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ImageGenerator for StabilityImageGenerator {
    async fn generate(&self, prompt: &str, seed: i64) -> anyhow::Result<Vec<u8>> {
        tracing::debug!(engine = "stability", seed, "image generate");
        let body = serde_json::json!({
            "text_prompts": [{ "text": prompt, "weight": 1 }],
            "cfg_scale": 7,
            "height": self.config.height,
            "width": self.config.width,
            "samples": 1,
            "steps": 30,
            "seed": seed,
            "style_preset": self.config.style_preset,
        });

        let endpoint = &self.config.api_url;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        let raw = response.text().await.context("read Stability response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            anyhow::bail!("Stability API error ({status}): {message}");
        }

        let value: serde_json::Value =
            serde_json::from_str(&raw).context("parse Stability response")?;
        let encoded = value
            .get("artifacts")
            .and_then(|v| v.as_array())
            .and_then(|artifacts| artifacts.first())
            .and_then(|artifact| artifact.get("base64"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("no image artifact in Stability response"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("decode image artifact")?;
        if bytes.is_empty() {
            anyhow::bail!("Stability returned an empty image");
        }
        Ok(bytes)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    value.get("message")?.as_str().map(str::to_owned)
}
