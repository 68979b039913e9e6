use std::ops::Range;
use std::sync::Arc;

use crate::app::asset_store::AssetStore;
use crate::app::error::{GenerationError, Phase};
use crate::app::model::{AudioSet, PageStructure, StoryStructure};
use crate::app::progress::ProgressReporter;
use crate::audio::{AudioGenerator, VoiceType};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
const WORDS_PER_SECOND: f64 = 2.5;

/// Splits `len` pages into consecutive batches of at most `batch_size`.
pub fn batch_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect()
}

pub fn estimate_narration_duration(text: &str) -> f64 {
    text.split_whitespace().count() as f64 / WORDS_PER_SECOND
}

/// Narrates pages in sequential batches to bound outbound speech requests.
#[derive(Clone)]
pub struct AudioFanout {
    generator: Arc<dyn AudioGenerator>,
    store: Arc<dyn AssetStore>,
    max_concurrent: usize,
}

impl AudioFanout {
    pub fn new(
        generator: Arc<dyn AudioGenerator>,
        store: Arc<dyn AssetStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            generator,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn generate_all(
        &self,
        story_id: &str,
        structure: &StoryStructure,
        voice: VoiceType,
        progress: &ProgressReporter,
    ) -> Result<Vec<AudioSet>, GenerationError> {
        let total = structure.pages.len();
        let batches = batch_ranges(total, self.max_concurrent);
        tracing::info!(
            story_id,
            pages = total,
            batches = batches.len(),
            voice = voice.as_str(),
            "generating audio"
        );

        let mut sets: Vec<Option<AudioSet>> = vec![None; total];
        for (batch_idx, range) in batches.into_iter().enumerate() {
            tracing::debug!(story_id, batch = batch_idx, pages = ?range, "audio batch");
            let mut join_set = tokio::task::JoinSet::new();
            for idx in range {
                let page = structure.pages[idx].clone();
                let generator = Arc::clone(&self.generator);
                let store = Arc::clone(&self.store);
                let progress = progress.clone();
                let story_id = story_id.to_string();
                join_set.spawn(async move {
                    let page_number = page_number(idx);
                    let result = generate_page(
                        generator, store, &story_id, page_number, &page, voice,
                    )
                    .await;
                    if result.is_ok() {
                        progress.audio_progress(page_number, total);
                    }
                    (idx, result)
                });
            }

            let mut failures: Vec<(usize, GenerationError)> = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((idx, Ok(set))) => sets[idx] = Some(set),
                    Ok((idx, Err(err))) => failures.push((idx, err)),
                    Err(err) => {
                        let err = anyhow::anyhow!("audio task aborted: {err}");
                        failures.push((usize::MAX, GenerationError::fatal(Phase::Audio, &err)));
                    }
                }
            }
            if !failures.is_empty() {
                failures.sort_by_key(|(idx, _)| *idx);
                let (idx, err) = failures.swap_remove(0);
                tracing::error!(story_id, page = page_number(idx), error = %err, "page audio failed");
                return Err(err);
            }
        }

        sets.into_iter()
            .enumerate()
            .map(|(idx, set)| {
                set.ok_or_else(|| {
                    let err = anyhow::anyhow!("missing audio for page {}", page_number(idx));
                    GenerationError::fatal(Phase::Audio, &err)
                })
            })
            .collect()
    }
}

async fn generate_page(
    generator: Arc<dyn AudioGenerator>,
    store: Arc<dyn AssetStore>,
    story_id: &str,
    page_number: u32,
    page: &PageStructure,
    voice: VoiceType,
) -> Result<AudioSet, GenerationError> {
    let mut effect_tasks = tokio::task::JoinSet::new();
    for (effect_idx, name) in page.sound_effects.iter().enumerate() {
        let generator = Arc::clone(&generator);
        let name = name.clone();
        effect_tasks.spawn(async move {
            let bytes = generator.generate_sound_effect(&name, voice).await;
            (effect_idx, bytes)
        });
    }

    let narration = generator.generate_narration(&page.text, voice).await;

    let mut effects = vec![Vec::new(); page.sound_effects.len()];
    while let Some(joined) = effect_tasks.join_next().await {
        match joined {
            Ok((effect_idx, bytes)) => effects[effect_idx] = bytes,
            Err(err) => tracing::warn!(story_id, page = page_number, %err, "sound effect task aborted"),
        }
    }

    let narration = narration.map_err(|err| {
        let err = err.context(format!("narrate page {page_number}"));
        GenerationError::fatal(Phase::Audio, &err)
    })?;
    store
        .save_narration(story_id, page_number, &narration)
        .await
        .map_err(|err| GenerationError::storage(&err))?;

    for (name, bytes) in page.sound_effects.iter().zip(&effects) {
        if bytes.is_empty() {
            tracing::warn!(story_id, page = page_number, effect = %name, "sound effect unavailable");
            continue;
        }
        store
            .save_effect(story_id, name, bytes)
            .await
            .map_err(|err| GenerationError::storage(&err))?;
    }

    Ok(AudioSet {
        duration: estimate_narration_duration(&page.text),
        narration,
        effects,
    })
}

fn page_number(idx: usize) -> u32 {
    u32::try_from(idx + 1).unwrap_or(u32::MAX)
}
