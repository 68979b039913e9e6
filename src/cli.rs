use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::app::model::StoryInput;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a story and print it as JSON.
    Generate(GenerateArgs),
    /// Print a stored story as JSON.
    Show(ShowArgs),
    /// List stored stories, newest first.
    List(ListArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TextEngine {
    Noop,
    Anthropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageEngine {
    Noop,
    Stability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudioEngine {
    Noop,
    Elevenlabs,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Data directory holding story JSON and assets.
    #[arg(long, default_value = "workspace")]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub story: StoryArgs,

    #[command(flatten)]
    pub engines: EngineArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Debug, Clone, Args)]
pub struct StoryArgs {
    #[arg(long)]
    pub character_name: String,

    #[arg(long)]
    pub setting: String,

    #[arg(long)]
    pub villain: String,

    #[arg(long)]
    pub special_item: String,

    #[arg(long)]
    pub character_trait: String,

    #[arg(long)]
    pub goal: String,

    #[arg(long)]
    pub time_period: String,

    #[arg(long)]
    pub mood: String,

    /// Lesson the story teaches.
    #[arg(long)]
    pub theme: String,

    /// Narrator voice: `male` or `female`.
    #[arg(long, default_value = "female")]
    pub voice_type: String,
}

impl From<StoryArgs> for StoryInput {
    fn from(args: StoryArgs) -> Self {
        Self {
            character_name: args.character_name,
            setting: args.setting,
            villain: args.villain,
            special_item: args.special_item,
            character_trait: args.character_trait,
            goal: args.goal,
            time_period: args.time_period,
            mood: args.mood,
            theme: args.theme,
            voice_type: args.voice_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Args)]
pub struct EngineArgs {
    /// Story text engine (`anthropic` reads ANTHROPIC_API_KEY).
    #[arg(long, value_enum, default_value_t = TextEngine::Noop)]
    pub text_engine: TextEngine,

    /// Illustration engine (`stability` reads STABILITY_API_KEY).
    #[arg(long, value_enum, default_value_t = ImageEngine::Noop)]
    pub image_engine: ImageEngine,

    /// Narration engine (`elevenlabs` reads ELEVENLABS_API_KEY).
    #[arg(long, value_enum, default_value_t = AudioEngine::Noop)]
    pub audio_engine: AudioEngine,

    /// Page count produced by the noop text engine.
    #[arg(long, default_value_t = 10)]
    pub noop_pages: u32,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct PipelineArgs {
    /// Extra attempts per page image after the first failure.
    #[arg(long, default_value_t = 3)]
    pub image_max_retries: u32,

    /// Base delay between image retries; doubles on each attempt.
    #[arg(long, default_value_t = 1000)]
    pub image_backoff_ms: u64,

    /// Pages narrated concurrently per batch.
    #[arg(long, default_value_t = 3)]
    pub audio_batch_size: usize,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(long, default_value = "workspace")]
    pub data_dir: PathBuf,

    #[arg(long)]
    pub story_id: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long, default_value = "workspace")]
    pub data_dir: PathBuf,
}
