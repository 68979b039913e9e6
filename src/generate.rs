use std::sync::Arc;

use anyhow::Context as _;

use crate::app::asset_store::{AssetStore, LocalFsAssetStore};
use crate::app::model::{Story, StoryInput, StoryStatus, StorySummary};
use crate::app::orchestrator::{PipelineOptions, StoryOrchestrator};
use crate::app::progress::TracingProgressSink;
use crate::app::queue::WorkerPool;
use crate::cli::{GenerateArgs, ListArgs, ShowArgs};
use crate::config::ProviderConfig;

pub async fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let providers = ProviderConfig::from_env()
        .providers(&args.engines)
        .context("configure providers")?;
    tracing::info!(
        data_dir = %args.data_dir.display(),
        text = ?args.engines.text_engine,
        image = ?args.engines.image_engine,
        audio = ?args.engines.audio_engine,
        "generate story"
    );

    let orchestrator = StoryOrchestrator::new(
        providers,
        Arc::new(LocalFsAssetStore::new(&args.data_dir)),
        Arc::new(TracingProgressSink),
        WorkerPool::new(1, 0),
        PipelineOptions::from(args.pipeline),
    );
    let story = orchestrator
        .generate(StoryInput::from(args.story))
        .await?;

    print_json(&story)?;
    if story.status != StoryStatus::Completed {
        anyhow::bail!(
            "story {} failed: {}",
            story.id,
            story.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let store = LocalFsAssetStore::new(&args.data_dir);
    let story: Story = store
        .load_story(args.story_id.trim())
        .await
        .context("load story")?
        .ok_or_else(|| anyhow::anyhow!("story not found: {}", args.story_id))?;
    print_json(&story)
}

pub async fn list(args: ListArgs) -> anyhow::Result<()> {
    let store = LocalFsAssetStore::new(&args.data_dir);
    let mut stories = store.list_stories().await.context("list stories")?;
    stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let summaries: Vec<StorySummary> = stories.iter().map(Story::summary).collect();
    print_json(&summaries)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{json}");
    Ok(())
}
