use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

pub const DEFAULT_ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";
pub const DEFAULT_MALE_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
pub const DEFAULT_FEMALE_VOICE_ID: &str = "EXAVITQu4vr4xnSDxMaL";

const MODEL_ID: &str = "eleven_monolingual_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    Male,
    Female,
}

impl VoiceType {
    /// Unknown selectors fall back to the female slot.
    pub fn from_selector(selector: &str) -> Self {
        match selector.trim().to_ascii_lowercase().as_str() {
            "male" => Self::Male,
            "female" => Self::Female,
            other => {
                tracing::warn!(selector = other, "unknown voice type; using female voice");
                Self::Female
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

/// Configured voice ids per slot.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    pub male: Option<String>,
    pub female: Option<String>,
}

impl VoiceCatalog {
    pub fn voice_id(&self, voice: VoiceType) -> String {
        let (configured, fallback) = match voice {
            VoiceType::Male => (&self.male, DEFAULT_MALE_VOICE_ID),
            VoiceType::Female => (&self.female, DEFAULT_FEMALE_VOICE_ID),
        };
        match configured.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                tracing::warn!(
                    voice = voice.as_str(),
                    fallback,
                    "no voice id configured; using default voice"
                );
                fallback.to_string()
            }
        }
    }
}

/// Speech synthesis for page narration and spoken sound effects.
#[async_trait]
pub trait AudioGenerator: Send + Sync {
    async fn generate_narration(&self, text: &str, voice: VoiceType) -> anyhow::Result<Vec<u8>>;

    /// Empty bytes signal that the effect could not be produced.
    async fn generate_sound_effect(&self, name: &str, voice: VoiceType) -> Vec<u8>;
}

/// Offline engine producing a short placeholder payload per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudioGenerator;

#[async_trait]
impl AudioGenerator for NoopAudioGenerator {
    async fn generate_narration(&self, text: &str, voice: VoiceType) -> anyhow::Result<Vec<u8>> {
        tracing::debug!(engine = "noop", voice = voice.as_str(), chars = text.len(), "narration");
        Ok(b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec())
    }

    async fn generate_sound_effect(&self, name: &str, voice: VoiceType) -> Vec<u8> {
        tracing::debug!(engine = "noop", voice = voice.as_str(), effect = name, "sound effect");
        b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub base_url: String,
    pub voices: VoiceCatalog,
    pub stability: f32,
    pub similarity_boost: f32,
}

#[derive(Debug, Clone)]
pub struct ElevenLabsAudioGenerator {
    client: reqwest::Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsAudioGenerator {
    pub fn new(config: ElevenLabsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build http client")?;
        Ok(Self { client, config })
    }

    async fn text_to_speech(
        &self,
        text: &str,
        voice: VoiceType,
        stability: f32,
        similarity_boost: f32,
    ) -> anyhow::Result<Vec<u8>> {
        let voice_id = self.config.voices.voice_id(voice);
        let base_url = self.config.base_url.trim_end_matches('/');
        let endpoint = format!("{base_url}/text-to-speech/{voice_id}");
        let body = serde_json::json!({
            "text": text,
            "model_id": MODEL_ID,
            "voice_settings": {
                "stability": stability,
                "similarity_boost": similarity_boost,
            },
        });

        let response = self
            .client
            .post(&endpoint)
            .header("xi-api-key", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            anyhow::bail!("ElevenLabs API error ({status}): {raw}");
        }
        let bytes = response
            .bytes()
            .await
            .context("read ElevenLabs response body")?;
        if bytes.is_empty() {
            anyhow::bail!("ElevenLabs returned empty audio");
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AudioGenerator for ElevenLabsAudioGenerator {
    async fn generate_narration(&self, text: &str, voice: VoiceType) -> anyhow::Result<Vec<u8>> {
        tracing::debug!(engine = "elevenlabs", voice = voice.as_str(), "narration");
        self.text_to_speech(
            text,
            voice,
            self.config.stability,
            self.config.similarity_boost,
        )
        .await
    }

    async fn generate_sound_effect(&self, name: &str, voice: VoiceType) -> Vec<u8> {
        let spoken = effect_description(name);
        match self.text_to_speech(&spoken, voice, 0.3, 0.5).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(effect = name, ?err, "sound effect failed; skipping");
                Vec::new()
            }
        }
    }
}

fn effect_description(name: &str) -> String {
    name.trim().replace('_', " ")
}
