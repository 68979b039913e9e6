use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::app::assembler;
use crate::app::asset_store::AssetStore;
use crate::app::audio_fanout::{AudioFanout, DEFAULT_MAX_CONCURRENT};
use crate::app::error::{GenerationError, Phase};
use crate::app::image_fanout::{ImageFanout, RetryPolicy};
use crate::app::model::{Story, StoryInput, StoryStatus, StorySummary};
use crate::app::progress::{ProgressReporter, ProgressSink};
use crate::app::queue::WorkerPool;
use crate::audio::{AudioGenerator, VoiceType};
use crate::image::ImageGenerator;
use crate::text::{self, TextGenerator};

/// The three generative providers a run depends on.
#[derive(Clone)]
pub struct Providers {
    pub text: Arc<dyn TextGenerator>,
    pub image: Arc<dyn ImageGenerator>,
    pub audio: Arc<dyn AudioGenerator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub image_retry: RetryPolicy,
    pub audio_batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            image_retry: RetryPolicy::default(),
            audio_batch_size: DEFAULT_MAX_CONCURRENT,
        }
    }
}

pub struct StoryOrchestrator {
    text: Arc<dyn TextGenerator>,
    images: ImageFanout,
    audio: AudioFanout,
    store: Arc<dyn AssetStore>,
    progress: Arc<dyn ProgressSink>,
    pool: WorkerPool,
    active: RwLock<HashMap<String, Story>>,
}

impl StoryOrchestrator {
    pub fn new(
        providers: Providers,
        store: Arc<dyn AssetStore>,
        progress: Arc<dyn ProgressSink>,
        pool: WorkerPool,
        options: PipelineOptions,
    ) -> Self {
        Self {
            text: providers.text,
            images: ImageFanout::new(providers.image, Arc::clone(&store), options.image_retry),
            audio: AudioFanout::new(providers.audio, Arc::clone(&store), options.audio_batch_size),
            store,
            progress,
            pool,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the input and records a PENDING story without generating it.
    pub async fn start(&self, input: StoryInput) -> Result<String, GenerationError> {
        input.validate()?;

        let story_id = uuid::Uuid::new_v4().to_string();
        let story = Story::pending(story_id.clone(), input);
        self.store
            .prepare_story(&story_id)
            .await
            .map_err(|err| GenerationError::storage(&err))?;
        self.store
            .save_story(&story)
            .await
            .map_err(|err| GenerationError::storage(&err))?;
        self.active.write().await.insert(story_id.clone(), story);

        tracing::info!(story_id = %story_id, "story created");
        Ok(story_id)
    }

    /// Queues `run(story_id)` on the worker pool and returns immediately.
    ///
    /// A story that cannot be queued is marked FAILED.
    pub async fn dispatch(self: &Arc<Self>, story_id: &str) -> Result<(), GenerationError> {
        let orchestrator = Arc::clone(self);
        let owned_id = story_id.to_string();
        let queued = self.pool.try_spawn(async move {
            orchestrator.run(&owned_id).await;
        });
        if let Err(err) = queued {
            tracing::warn!(story_id, error = %err, "story rejected");
            let mut story = self.get(story_id).await?;
            self.mark_failed(&mut story, &err.to_string()).await;
            return Err(err);
        }
        Ok(())
    }

    /// Starts a story and runs it to completion in the current task.
    pub async fn generate(&self, input: StoryInput) -> Result<Story, GenerationError> {
        let story_id = self.start(input).await?;
        self.run(&story_id).await;
        self.get(&story_id).await
    }

    pub async fn run(&self, story_id: &str) {
        let reporter = ProgressReporter::new(Arc::clone(&self.progress), story_id);
        let mut story = match self.get(story_id).await {
            Ok(story) => story,
            Err(err) => {
                tracing::error!(story_id, error = %err, "cannot run story");
                reporter.error(&err.to_string());
                return;
            }
        };
        if story.status != StoryStatus::Pending {
            tracing::warn!(story_id, status = %story.status, "story already started; skipping run");
            return;
        }

        if let Err(err) = self.try_run(&mut story, &reporter).await {
            if err.is_transient() {
                tracing::warn!(story_id, error = %err, "story generation failed after retries");
            } else {
                tracing::error!(story_id, error = %err, "story generation failed");
            }
            let message = err.to_string();
            if self.mark_failed(&mut story, &message).await {
                reporter.error(&message);
            }
        }
    }

    async fn try_run(
        &self,
        story: &mut Story,
        reporter: &ProgressReporter,
    ) -> Result<(), GenerationError> {
        let story_id = story.id.clone();
        reporter.started();

        self.advance(story, StoryStatus::GeneratingStory).await?;
        reporter.generating_story();
        let outline = self
            .text
            .generate_outline(&story_id, &story.input)
            .await
            .map_err(|err| GenerationError::fatal(Phase::Outline, &err))?;
        let mut structure = self
            .text
            .generate_full_story(&story_id, &story.input, &outline)
            .await
            .map_err(|err| GenerationError::fatal(Phase::FullStory, &err))?;
        text::check_structure(&story_id, &mut structure)
            .map_err(|err| GenerationError::fatal(Phase::FullStory, &err))?;
        story.title = Some(structure.title.clone());
        reporter.story_complete();

        self.advance(story, StoryStatus::GeneratingImages).await?;
        self.images
            .generate_all(&story_id, &structure, reporter)
            .await?;
        reporter.images_complete();

        self.advance(story, StoryStatus::GeneratingAudio).await?;
        let voice = VoiceType::from_selector(&story.input.voice_type);
        let audio = self
            .audio
            .generate_all(&story_id, &structure, voice, reporter)
            .await?;

        let mut assembled = story.clone();
        assembler::assemble(&mut assembled, &structure, &audio, self.store.as_ref())?;
        self.advance(&mut assembled, StoryStatus::Assembling).await?;
        *story = assembled;
        reporter.assembling();

        story.completed_at = Some(Utc::now());
        self.advance(story, StoryStatus::Completed).await?;
        reporter.complete();
        tracing::info!(
            story_id = %story_id,
            pages = story.pages.len(),
            "story completed"
        );
        Ok(())
    }

    /// Persists `story` at `next`, then publishes it to the active map.
    async fn advance(&self, story: &mut Story, next: StoryStatus) -> Result<(), GenerationError> {
        let mut candidate = story.clone();
        candidate.transition(next)?;
        self.store
            .save_story(&candidate)
            .await
            .map_err(|err| GenerationError::storage(&err))?;
        tracing::debug!(story_id = %candidate.id, status = %next, "story status changed");
        *story = candidate;
        self.active
            .write()
            .await
            .insert(story.id.clone(), story.clone());
        Ok(())
    }

    /// Returns false when the story had already reached a terminal state.
    async fn mark_failed(&self, story: &mut Story, message: &str) -> bool {
        if let Err(err) = story.transition(StoryStatus::Failed) {
            tracing::warn!(story_id = %story.id, error = %err, "story already finished");
            return false;
        }
        story.error_message = Some(message.to_string());
        if let Err(err) = self.store.save_story(story).await {
            tracing::error!(story_id = %story.id, ?err, "failed to persist failed story");
        }
        self.active
            .write()
            .await
            .insert(story.id.clone(), story.clone());
        true
    }

    /// Looks in the active map first, then in the store.
    pub async fn get(&self, story_id: &str) -> Result<Story, GenerationError> {
        if let Some(story) = self.active.read().await.get(story_id) {
            return Ok(story.clone());
        }
        self.store
            .load_story(story_id)
            .await
            .map_err(|err| GenerationError::storage(&err))?
            .ok_or_else(|| GenerationError::NotFound(story_id.to_string()))
    }

    /// Summaries of every persisted story, newest first.
    pub async fn list(&self) -> Result<Vec<StorySummary>, GenerationError> {
        let mut stories = self
            .store
            .list_stories()
            .await
            .map_err(|err| GenerationError::storage(&err))?;
        {
            let active = self.active.read().await;
            for story in &mut stories {
                if let Some(current) = active.get(&story.id) {
                    *story = current.clone();
                }
            }
        }
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories.iter().map(Story::summary).collect())
    }

    pub async fn delete(&self, story_id: &str) -> Result<(), GenerationError> {
        let in_memory = match self.active.read().await.get(story_id) {
            Some(story) if !story.status.is_terminal() => {
                return Err(GenerationError::InProgress(story_id.to_string()));
            }
            Some(_) => true,
            None => false,
        };
        let deleted = self
            .store
            .delete_story(story_id)
            .await
            .map_err(|err| GenerationError::storage(&err))?;
        self.active.write().await.remove(story_id);
        if !deleted && !in_memory {
            return Err(GenerationError::NotFound(story_id.to_string()));
        }
        tracing::info!(story_id, "story deleted");
        Ok(())
    }
}
