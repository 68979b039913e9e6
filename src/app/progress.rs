use std::sync::Arc;

use tokio::sync::broadcast;

use crate::app::model::{GenerationProgress, StoryStatus};

/// Delivers progress events. Publishing is best-effort and must not block.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, progress: &GenerationProgress);
}

/// Fans events out to every live subscriber; events with no subscriber are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastProgressSink {
    tx: broadcast::Sender<GenerationProgress>,
}

impl BroadcastProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationProgress> {
        self.tx.subscribe()
    }
}

impl ProgressSink for BroadcastProgressSink {
    fn publish(&self, progress: &GenerationProgress) {
        let _ = self.tx.send(progress.clone());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn publish(&self, progress: &GenerationProgress) {
        tracing::info!(
            story_id = %progress.story_id,
            status = %progress.status,
            percent = progress.progress_percentage,
            stage = %progress.stage,
            "{}",
            progress.message
        );
    }
}

/// Publishes the fixed progress schedule of one story's run.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    story_id: String,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, story_id: impl Into<String>) -> Self {
        Self {
            sink,
            story_id: story_id.into(),
        }
    }

    pub fn started(&self) {
        self.send(StoryStatus::Pending, 0, "Starting", "Preparing your story...".into());
    }

    pub fn generating_story(&self) {
        self.send(
            StoryStatus::GeneratingStory,
            10,
            "Writing Story",
            "Writing the outline and pages...".into(),
        );
    }

    pub fn story_complete(&self) {
        self.send(
            StoryStatus::GeneratingStory,
            30,
            "Story Complete",
            "Story text is ready; painting the illustrations next...".into(),
        );
    }

    pub fn image_progress(&self, page: u32, total: usize) {
        self.send(
            StoryStatus::GeneratingImages,
            scaled(30, 40, page, total),
            "Painting Illustrations",
            format!("Illustrated page {page} of {total}"),
        );
    }

    pub fn images_complete(&self) {
        self.send(
            StoryStatus::GeneratingAudio,
            70,
            "Illustrations Complete",
            "Every page is illustrated; recording narration...".into(),
        );
    }

    pub fn audio_progress(&self, page: u32, total: usize) {
        self.send(
            StoryStatus::GeneratingAudio,
            scaled(70, 20, page, total),
            "Recording Narration",
            format!("Narrated page {page} of {total}"),
        );
    }

    pub fn assembling(&self) {
        self.send(
            StoryStatus::Assembling,
            90,
            "Assembling Book",
            "Putting the pages together...".into(),
        );
    }

    pub fn complete(&self) {
        self.send(StoryStatus::Completed, 100, "Complete", "Your story is ready!".into());
    }

    pub fn error(&self, message: &str) {
        self.send(
            StoryStatus::Failed,
            0,
            "Error",
            format!("Story generation failed: {message}"),
        );
    }

    fn send(&self, status: StoryStatus, percent: u32, stage: &str, message: String) {
        self.sink.publish(&GenerationProgress {
            story_id: self.story_id.clone(),
            status,
            progress_percentage: percent.min(100),
            stage: stage.to_string(),
            message,
        });
    }
}

fn scaled(base: u32, range: u32, page: u32, total: usize) -> u32 {
    let total = u32::try_from(total.max(1)).unwrap_or(u32::MAX);
    base + range * page.min(total) / total
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<GenerationProgress>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<GenerationProgress> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressSink for RecordingSink {
        fn publish(&self, progress: &GenerationProgress) {
            self.events.lock().unwrap().push(progress.clone());
        }
    }
}
