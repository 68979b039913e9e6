use std::sync::Arc;
use std::time::Duration;

use crate::app::asset_store::AssetStore;
use crate::app::error::{GenerationError, Phase};
use crate::app::model::StoryStructure;
use crate::app::progress::ProgressReporter;
use crate::image::ImageGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (0-based): `2^attempt` units.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

pub async fn generate_image_with_retry(
    generator: &dyn ImageGenerator,
    prompt: &str,
    seed: i64,
    policy: RetryPolicy,
) -> Result<Vec<u8>, GenerationError> {
    if prompt.trim().is_empty() {
        return Err(GenerationError::fatal(
            Phase::Images,
            &anyhow::anyhow!("story text produced a blank image prompt"),
        ));
    }

    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 0u32;
    loop {
        match generator.generate(prompt, seed).await {
            Ok(bytes) => return Ok(bytes),
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{err:#}"),
                    "image generation failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                let err = err.context(format!("gave up after {attempts} attempt(s)"));
                return Err(GenerationError::transient(Phase::Images, &err));
            }
        }
    }
}

/// Generates every page's illustration concurrently, each with its own retries.
#[derive(Clone)]
pub struct ImageFanout {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<dyn AssetStore>,
    policy: RetryPolicy,
}

impl ImageFanout {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn AssetStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            store,
            policy,
        }
    }

    /// Returns the image bytes in page order. Errors surface only after every
    /// page has finished.
    pub async fn generate_all(
        &self,
        story_id: &str,
        structure: &StoryStructure,
        progress: &ProgressReporter,
    ) -> Result<Vec<Vec<u8>>, GenerationError> {
        let total = structure.pages.len();
        tracing::info!(story_id, pages = total, "generating images");

        let mut join_set = tokio::task::JoinSet::new();
        for (idx, page) in structure.pages.iter().enumerate() {
            let page_number = page_number(idx);
            let seed = structure.image_seed.saturating_add(idx as i64);
            let prompt = page.image_prompt.clone();
            let generator = Arc::clone(&self.generator);
            let store = Arc::clone(&self.store);
            let progress = progress.clone();
            let story_id = story_id.to_string();
            let policy = self.policy;

            join_set.spawn(async move {
                let result = async {
                    let bytes =
                        generate_image_with_retry(generator.as_ref(), &prompt, seed, policy)
                            .await?;
                    store
                        .save_image(&story_id, page_number, &bytes)
                        .await
                        .map_err(|err| GenerationError::storage(&err))?;
                    progress.image_progress(page_number, total);
                    tracing::debug!(story_id = %story_id, page = page_number, "image saved");
                    Ok::<_, GenerationError>(bytes)
                }
                .await;
                (idx, result)
            });
        }

        let mut images: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut failures: Vec<(u32, GenerationError)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Ok(bytes))) => images[idx] = Some(bytes),
                Ok((idx, Err(err))) => {
                    tracing::error!(story_id, page = page_number(idx), error = %err, "page image failed");
                    failures.push((page_number(idx), err));
                }
                Err(err) => {
                    let err = anyhow::anyhow!("image task aborted: {err}");
                    failures.push((u32::MAX, GenerationError::fatal(Phase::Images, &err)));
                }
            }
        }

        if !failures.is_empty() {
            let failed = failures.len();
            failures.sort_by_key(|(page, _)| *page);
            let (page, first) = failures.swap_remove(0);
            return Err(annotate(first, page, failed, total));
        }

        images
            .into_iter()
            .enumerate()
            .map(|(idx, image)| {
                image.ok_or_else(|| {
                    let err = anyhow::anyhow!("missing image for page {}", page_number(idx));
                    GenerationError::fatal(Phase::Images, &err)
                })
            })
            .collect()
    }
}

fn page_number(idx: usize) -> u32 {
    u32::try_from(idx + 1).unwrap_or(u32::MAX)
}

fn annotate(err: GenerationError, page: u32, failed: usize, total: usize) -> GenerationError {
    let suffix = format!("page {page}; {failed} of {total} page(s) failed");
    match err {
        GenerationError::Provider {
            phase,
            transient,
            message,
        } => GenerationError::Provider {
            phase,
            transient,
            message: format!("{message} ({suffix})"),
        },
        GenerationError::Storage(message) => GenerationError::Storage(format!("{message} ({suffix})")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::app::asset_store::LocalFsAssetStore;
    use crate::app::model::PageStructure;
    use crate::app::progress::testing::RecordingSink;

    const STORY_ID: &str = "0d5e3c8a-2f61-4b7e-8f0b-1a9c2d3e4f50";

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_unit: Duration::from_millis(1),
        }
    }

    struct FlakyImages {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ImageGenerator for FlakyImages {
        async fn generate(&self, _prompt: &str, _seed: i64) -> anyhow::Result<Vec<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                anyhow::bail!("HTTP 503");
            }
            Ok(b"png".to_vec())
        }
    }

    /// Fails permanently for the listed prompts and records the seeds it sees.
    #[derive(Default)]
    struct SelectiveImages {
        failing_prompts: HashSet<String>,
        seeds: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl ImageGenerator for SelectiveImages {
        async fn generate(&self, prompt: &str, seed: i64) -> anyhow::Result<Vec<u8>> {
            self.seeds.lock().unwrap().push(seed);
            if self.failing_prompts.contains(prompt) {
                anyhow::bail!("content policy violation");
            }
            Ok(prompt.as_bytes().to_vec())
        }
    }

    fn structure(prompts: &[&str]) -> StoryStructure {
        StoryStructure {
            title: "t".to_string(),
            image_seed: 100,
            pages: prompts
                .iter()
                .enumerate()
                .map(|(idx, prompt)| PageStructure {
                    page_number: idx as u32 + 1,
                    text: "text".to_string(),
                    image_prompt: prompt.to_string(),
                    mood: String::new(),
                    background_music: String::new(),
                    sound_effects: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let generator = FlakyImages {
            failures_before_success: 2,
            calls: AtomicUsize::new(0),
        };
        let bytes = generate_image_with_retry(&generator, "a harbor", 1, fast_policy(3))
            .await
            .unwrap();
        assert_eq!(bytes, b"png");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let generator = FlakyImages {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let err = generate_image_with_retry(&generator, "a harbor", 1, fast_policy(2))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("HTTP 503"), "{err}");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn blank_prompt_never_calls_generator() {
        let generator = FlakyImages {
            failures_before_success: 0,
            calls: AtomicUsize::new(0),
        };
        let err = generate_image_with_retry(&generator, "  ", 1, fast_policy(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Provider {
                phase: Phase::Images,
                transient: false,
                ..
            }
        ));
        assert!(err.to_string().contains("blank image prompt"), "{err}");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stores_pages_in_order_with_offset_seeds() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = Arc::new(LocalFsAssetStore::new(temp.path()));
        let generator = Arc::new(SelectiveImages::default());
        let sink = Arc::new(RecordingSink::default());
        let fanout = ImageFanout::new(generator.clone(), store.clone(), fast_policy(0));

        let images = fanout
            .generate_all(
                STORY_ID,
                &structure(&["one", "two", "three"]),
                &ProgressReporter::new(sink.clone(), STORY_ID),
            )
            .await?;

        assert_eq!(images, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        let mut seeds = generator.seeds.lock().unwrap().clone();
        seeds.sort_unstable();
        assert_eq!(seeds, vec![100, 101, 102]);
        assert!(store.asset_path(STORY_ID, "images/page-3.png").await?.is_some());
        assert_eq!(sink.events().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn failing_page_waits_for_siblings_and_reports_lowest_page() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = Arc::new(LocalFsAssetStore::new(temp.path()));
        let generator = Arc::new(SelectiveImages {
            failing_prompts: ["two", "four"].into_iter().map(String::from).collect(),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let fanout = ImageFanout::new(generator, store.clone(), fast_policy(1));

        let err = fanout
            .generate_all(
                STORY_ID,
                &structure(&["one", "two", "three", "four"]),
                &ProgressReporter::new(sink.clone(), STORY_ID),
            )
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("page 2; 2 of 4 page(s) failed"), "{message}");
        assert!(store.asset_path(STORY_ID, "images/page-1.png").await?.is_some());
        assert!(store.asset_path(STORY_ID, "images/page-3.png").await?.is_some());
        assert_eq!(sink.events().len(), 2);
        Ok(())
    }
}
