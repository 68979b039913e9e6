use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::anthropic;
use crate::app::image_fanout::RetryPolicy;
use crate::app::orchestrator::{PipelineOptions, Providers};
use crate::audio::{
    AudioGenerator, DEFAULT_ELEVENLABS_BASE_URL, ElevenLabsAudioGenerator, ElevenLabsConfig,
    NoopAudioGenerator, VoiceCatalog,
};
use crate::cli::{AudioEngine, EngineArgs, ImageEngine, PipelineArgs, TextEngine};
use crate::image::{
    DEFAULT_STABILITY_API_URL, DEFAULT_STYLE_PRESET, ImageGenerator, NoopImageGenerator,
    StabilityConfig, StabilityImageGenerator,
};
use crate::text::{AnthropicConfig, AnthropicTextGenerator, NoopTextGenerator, TextGenerator};

const IMAGE_SIZE: u32 = 1024;

/// Provider credentials and endpoints read from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub anthropic_model: Option<String>,
    pub stability_api_key: Option<String>,
    pub stability_api_url: Option<String>,
    pub stability_style_preset: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_base_url: Option<String>,
    pub voices: VoiceCatalog,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            anthropic_api_key: var("ANTHROPIC_API_KEY"),
            anthropic_base_url: var("ANTHROPIC_BASE_URL"),
            anthropic_model: var("ANTHROPIC_MODEL"),
            stability_api_key: var("STABILITY_API_KEY"),
            stability_api_url: var("STABILITY_API_URL"),
            stability_style_preset: var("STABILITY_STYLE_PRESET"),
            elevenlabs_api_key: var("ELEVENLABS_API_KEY"),
            elevenlabs_base_url: var("ELEVENLABS_BASE_URL"),
            voices: VoiceCatalog {
                male: var("ELEVENLABS_MALE_VOICE_ID"),
                female: var("ELEVENLABS_FEMALE_VOICE_ID"),
            },
        }
    }

    pub fn providers(&self, engines: &EngineArgs) -> anyhow::Result<Providers> {
        Ok(Providers {
            text: self.text_generator(engines)?,
            image: self.image_generator(engines.image_engine)?,
            audio: self.audio_generator(engines.audio_engine)?,
        })
    }

    fn text_generator(&self, engines: &EngineArgs) -> anyhow::Result<Arc<dyn TextGenerator>> {
        match engines.text_engine {
            TextEngine::Noop => Ok(Arc::new(NoopTextGenerator::new(engines.noop_pages))),
            TextEngine::Anthropic => {
                let api_key = required(&self.anthropic_api_key, "ANTHROPIC_API_KEY")?;
                let config = AnthropicConfig {
                    api_key,
                    base_url: self
                        .anthropic_base_url
                        .clone()
                        .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string()),
                    model: self
                        .anthropic_model
                        .clone()
                        .unwrap_or_else(|| anthropic::DEFAULT_MODEL.to_string()),
                };
                tracing::info!(engine = "anthropic", model = %config.model, "text engine");
                Ok(Arc::new(
                    AnthropicTextGenerator::new(config).context("init Anthropic client")?,
                ))
            }
        }
    }

    fn image_generator(&self, engine: ImageEngine) -> anyhow::Result<Arc<dyn ImageGenerator>> {
        match engine {
            ImageEngine::Noop => Ok(Arc::new(NoopImageGenerator)),
            ImageEngine::Stability => {
                let config = StabilityConfig {
                    api_key: required(&self.stability_api_key, "STABILITY_API_KEY")?,
                    api_url: self
                        .stability_api_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_STABILITY_API_URL.to_string()),
                    style_preset: self
                        .stability_style_preset
                        .clone()
                        .unwrap_or_else(|| DEFAULT_STYLE_PRESET.to_string()),
                    width: IMAGE_SIZE,
                    height: IMAGE_SIZE,
                };
                Ok(Arc::new(
                    StabilityImageGenerator::new(config).context("init Stability client")?,
                ))
            }
        }
    }

    fn audio_generator(&self, engine: AudioEngine) -> anyhow::Result<Arc<dyn AudioGenerator>> {
        match engine {
            AudioEngine::Noop => Ok(Arc::new(NoopAudioGenerator)),
            AudioEngine::Elevenlabs => {
                let config = ElevenLabsConfig {
                    api_key: required(&self.elevenlabs_api_key, "ELEVENLABS_API_KEY")?,
                    base_url: self
                        .elevenlabs_base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ELEVENLABS_BASE_URL.to_string()),
                    voices: self.voices.clone(),
                    stability: 0.5,
                    similarity_boost: 0.75,
                };
                Ok(Arc::new(
                    ElevenLabsAudioGenerator::new(config).context("init ElevenLabs client")?,
                ))
            }
        }
    }
}

fn required(value: &Option<String>, name: &str) -> anyhow::Result<String> {
    value
        .clone()
        .ok_or_else(|| anyhow::anyhow!("{name} is not set"))
}

impl From<PipelineArgs> for PipelineOptions {
    fn from(args: PipelineArgs) -> Self {
        Self {
            image_retry: RetryPolicy {
                max_retries: args.image_max_retries,
                backoff_unit: Duration::from_millis(args.image_backoff_ms),
            },
            audio_batch_size: args.audio_batch_size.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn engines(text: TextEngine, image: ImageEngine, audio: AudioEngine) -> EngineArgs {
        EngineArgs {
            text_engine: text,
            image_engine: image,
            audio_engine: audio,
            noop_pages: 3,
        }
    }

    #[test]
    fn blank_variables_are_treated_as_unset() {
        let config = ProviderConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "  "),
            ("ELEVENLABS_MALE_VOICE_ID", " voice-m "),
        ]));
        assert_eq!(config.anthropic_api_key, None);
        assert_eq!(config.voices.male.as_deref(), Some("voice-m"));
    }

    #[test]
    fn real_engines_require_api_keys() {
        let config = ProviderConfig::from_lookup(lookup(&[]));
        let err = config
            .providers(&engines(TextEngine::Anthropic, ImageEngine::Noop, AudioEngine::Noop))
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("ANTHROPIC_API_KEY is not set"), "{err}");

        let err = config
            .providers(&engines(TextEngine::Noop, ImageEngine::Stability, AudioEngine::Noop))
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("STABILITY_API_KEY is not set"), "{err}");
    }

    #[test]
    fn noop_engines_need_no_configuration() {
        let config = ProviderConfig::from_lookup(lookup(&[]));
        assert!(
            config
                .providers(&engines(TextEngine::Noop, ImageEngine::Noop, AudioEngine::Noop))
                .is_ok()
        );
    }

    #[test]
    fn pipeline_args_map_to_options() {
        let options = PipelineOptions::from(PipelineArgs {
            image_max_retries: 5,
            image_backoff_ms: 250,
            audio_batch_size: 0,
        });
        assert_eq!(options.image_retry.max_retries, 5);
        assert_eq!(options.image_retry.backoff_unit, Duration::from_millis(250));
        assert_eq!(options.audio_batch_size, 1);
    }
}
