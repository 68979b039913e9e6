use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng as _;

use crate::anthropic;
use crate::app::model::{
    CharacterProfile, OutlineSection, PageStructure, StoryInput, StoryOutline, StoryStructure,
};

const SEED_RANGE: std::ops::RangeInclusive<i64> = 1000..=9999;
const EXPECTED_PAGES: std::ops::RangeInclusive<usize> = 10..=15;
const MAX_TOKENS: u32 = 8192;

/// Two-phase narrative generation: an outline, then the per-page story.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_outline(
        &self,
        story_id: &str,
        input: &StoryInput,
    ) -> anyhow::Result<StoryOutline>;

    async fn generate_full_story(
        &self,
        story_id: &str,
        input: &StoryInput,
        outline: &StoryOutline,
    ) -> anyhow::Result<StoryStructure>;
}

/// Offline engine that writes a fixed-shape story from the input fields.
#[derive(Debug, Clone, Copy)]
pub struct NoopTextGenerator {
    pages: u32,
}

impl NoopTextGenerator {
    pub fn new(pages: u32) -> Self {
        Self {
            pages: pages.max(1),
        }
    }
}

impl Default for NoopTextGenerator {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl TextGenerator for NoopTextGenerator {
    async fn generate_outline(
        &self,
        story_id: &str,
        input: &StoryInput,
    ) -> anyhow::Result<StoryOutline> {
        tracing::debug!(engine = "noop", story_id, "generate outline");
        let beginning = (self.pages / 4).max(1).min(self.pages);
        let end = (self.pages / 4).min(self.pages - beginning);
        let middle = self.pages - beginning - end;
        let section = |summary: String, page_count: u32| OutlineSection {
            summary,
            key_events: Vec::new(),
            page_count,
            conflict: None,
            resolution: None,
        };
        Ok(StoryOutline {
            title: format!("{} and {}", input.character_name, input.special_item),
            theme: input.theme.clone(),
            target_pages: self.pages,
            beginning: section(
                format!("{} lives in {}.", input.character_name, input.setting),
                beginning,
            ),
            middle: OutlineSection {
                conflict: Some(format!("{} stands in the way.", input.villain)),
                ..section(format!("{} sets out to {}.", input.character_name, input.goal), middle)
            },
            end: OutlineSection {
                resolution: Some(format!("{} wins through being {}.", input.character_name, input.character_trait)),
                ..section(format!("{} learns about {}.", input.character_name, input.theme), end)
            },
            characters: vec![CharacterProfile {
                name: input.character_name.clone(),
                role: "protagonist".to_string(),
                appearance: String::new(),
                personality: input.character_trait.clone(),
            }],
            narrative_arc: String::new(),
            image_seed: random_seed(),
        })
    }

    async fn generate_full_story(
        &self,
        story_id: &str,
        input: &StoryInput,
        outline: &StoryOutline,
    ) -> anyhow::Result<StoryStructure> {
        tracing::debug!(engine = "noop", story_id, "generate full story");
        let pages = (1..=outline.target_pages.max(1))
            .map(|page_number| PageStructure {
                page_number,
                text: format!(
                    "Page {page_number}: {} carried {} through {}.",
                    input.character_name, input.special_item, input.setting
                ),
                image_prompt: format!(
                    "Storybook illustration of {} in {}, page {page_number}",
                    input.character_name, input.setting
                ),
                mood: input.mood.clone(),
                background_music: "journey".to_string(),
                sound_effects: Vec::new(),
            })
            .collect();
        Ok(StoryStructure {
            title: outline.title.clone(),
            image_seed: outline.image_seed,
            pages,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct AnthropicTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicTextGenerator {
    pub fn new(config: AnthropicConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: anthropic::messages_endpoint(&config.base_url),
            api_key: config.api_key,
            model: config.model,
        })
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        anthropic::messages_text(
            &self.client,
            &self.endpoint,
            &self.api_key,
            &self.model,
            MAX_TOKENS,
            prompt,
        )
        .await
    }
}

#[async_trait]
impl TextGenerator for AnthropicTextGenerator {
    async fn generate_outline(
        &self,
        story_id: &str,
        input: &StoryInput,
    ) -> anyhow::Result<StoryOutline> {
        tracing::info!(engine = "anthropic", story_id, model = %self.model, "generate outline");
        let prompt = outline_prompt(input, random_seed());
        let raw = self.complete(&prompt).await.context("call Anthropic")?;
        let outline: StoryOutline =
            serde_json::from_str(extract_json(&raw)).context("parse story outline")?;
        tracing::info!(
            story_id,
            title = %outline.title,
            target_pages = outline.target_pages,
            "outline ready"
        );
        Ok(outline)
    }

    async fn generate_full_story(
        &self,
        story_id: &str,
        input: &StoryInput,
        outline: &StoryOutline,
    ) -> anyhow::Result<StoryStructure> {
        tracing::info!(engine = "anthropic", story_id, model = %self.model, "generate full story");
        let prompt = full_story_prompt(input, outline).context("build full story prompt")?;
        let raw = self.complete(&prompt).await.context("call Anthropic")?;
        let structure: StoryStructure =
            serde_json::from_str(extract_json(&raw)).context("parse story structure")?;
        tracing::info!(
            story_id,
            title = %structure.title,
            pages = structure.pages.len(),
            "story text ready"
        );
        Ok(structure)
    }
}

fn random_seed() -> i64 {
    rand::rng().random_range(SEED_RANGE)
}

/// Renumbers pages sequentially and rejects an empty story.
pub fn check_structure(story_id: &str, structure: &mut StoryStructure) -> anyhow::Result<()> {
    if structure.pages.is_empty() {
        anyhow::bail!("story structure has no pages");
    }
    let count = structure.pages.len();
    if !EXPECTED_PAGES.contains(&count) {
        tracing::warn!(
            story_id,
            pages = count,
            "story page count outside the expected 10-15 range"
        );
    }
    for (idx, page) in structure.pages.iter_mut().enumerate() {
        page.page_number = u32::try_from(idx + 1).context("page number overflow")?;
    }
    Ok(())
}

/// Returns the body of the first fenced code block, or the trimmed text.
pub fn extract_json(raw: &str) -> &str {
    let Some(start) = raw.find("```") else {
        return raw.trim();
    };
    let after_fence = &raw[start + 3..];
    let after_lang = after_fence
        .strip_prefix("json")
        .or_else(|| after_fence.strip_prefix("JSON"))
        .unwrap_or(after_fence);
    match after_lang.find("```") {
        Some(end) => after_lang[..end].trim(),
        None => after_lang.trim(),
    }
}

fn one_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn outline_prompt(input: &StoryInput, seed: i64) -> String {
    format!(
        "You are an author of illustrated children's books.\n\
Outline a 10-15 page story that teaches this lesson: {theme}.\n\
\n\
Story elements:\n\
- Main character: {name}\n\
- Setting: {setting}\n\
- Villain: {villain}\n\
- Special item: {item}\n\
- Character trait: {trait_}\n\
- Goal: {goal}\n\
- Time period: {period}\n\
- Mood: {mood}\n\
\n\
Split the story into a beginning (2-3 pages), a middle (6-9 pages) and an end (2-3 pages).\n\
\n\
Output:\n\
- Output ONLY a JSON object of the form\n\
{{\"title\": \"...\", \"theme\": \"{theme}\", \"targetPages\": 12,\n\
 \"beginning\": {{\"summary\": \"...\", \"keyEvents\": [\"...\"], \"pageCount\": 3}},\n\
 \"middle\": {{\"summary\": \"...\", \"keyEvents\": [\"...\"], \"conflict\": \"...\", \"pageCount\": 7}},\n\
 \"end\": {{\"summary\": \"...\", \"keyEvents\": [\"...\"], \"resolution\": \"...\", \"pageCount\": 2}},\n\
 \"characters\": [{{\"name\": \"...\", \"role\": \"...\", \"appearance\": \"...\", \"personality\": \"...\"}}],\n\
 \"narrativeArc\": \"...\", \"imageSeed\": {seed}}}\n",
        theme = one_line(&input.theme),
        name = one_line(&input.character_name),
        setting = one_line(&input.setting),
        villain = one_line(&input.villain),
        item = one_line(&input.special_item),
        trait_ = one_line(&input.character_trait),
        goal = one_line(&input.goal),
        period = one_line(&input.time_period),
        mood = one_line(&input.mood),
    )
}

fn full_story_prompt(input: &StoryInput, outline: &StoryOutline) -> anyhow::Result<String> {
    let outline_json = serde_json::to_string(outline).context("serialize outline")?;
    let beginning_end = outline.beginning.page_count;
    let middle_end = beginning_end + outline.middle.page_count;
    Ok(format!(
        "You are an author of illustrated children's books for ages 5-10.\n\
Write the complete {pages}-page story for this outline:\n\
{outline_json}\n\
\n\
Structure:\n\
- Pages 1-{beginning_end}: {beginning}\n\
- Pages {middle_start}-{middle_end}: {middle}\n\
- Remaining pages: {end}\n\
\n\
Rules:\n\
- 2-4 short sentences per page, with dialogue.\n\
- Keep the mood {mood}.\n\
- Each image prompt describes a storybook illustration with the subject on the left side of the frame.\n\
- backgroundMusic is one of: scary, action, awesome, journey.\n\
- soundEffects are short snake_case names such as door_creak.\n\
\n\
Output:\n\
- Output ONLY a JSON object of the form\n\
{{\"title\": \"...\", \"imageSeed\": {seed}, \"pages\": [{{\"pageNumber\": 1, \"text\": \"...\",\n\
 \"imagePrompt\": \"...\", \"mood\": \"...\", \"backgroundMusic\": \"journey\", \"soundEffects\": [\"...\"]}}]}}\n",
        pages = outline.target_pages,
        beginning = outline.beginning.summary,
        middle_start = beginning_end + 1,
        middle = outline.middle.summary,
        end = outline.end.summary,
        mood = one_line(&input.mood),
        seed = outline.image_seed,
    ))
}
