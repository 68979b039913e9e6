use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::error::GenerationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryStatus {
    Pending,
    GeneratingStory,
    GeneratingImages,
    GeneratingAudio,
    Assembling,
    Completed,
    Failed,
}

impl StoryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only non-failure status a story may move to from `self`.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::GeneratingStory),
            Self::GeneratingStory => Some(Self::GeneratingImages),
            Self::GeneratingImages => Some(Self::GeneratingAudio),
            Self::GeneratingAudio => Some(Self::Assembling),
            Self::Assembling => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    /// Coarse progress reported by the status endpoint.
    pub fn progress_percent(self) -> u32 {
        match self {
            Self::Pending => 0,
            Self::GeneratingStory => 20,
            Self::GeneratingImages => 50,
            Self::GeneratingAudio => 80,
            Self::Assembling => 95,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::GeneratingStory => "GENERATING_STORY",
            Self::GeneratingImages => "GENERATING_IMAGES",
            Self::GeneratingAudio => "GENERATING_AUDIO",
            Self::Assembling => "ASSEMBLING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryInput {
    pub character_name: String,
    pub setting: String,
    pub villain: String,
    pub special_item: String,
    pub character_trait: String,
    pub goal: String,
    pub time_period: String,
    pub mood: String,
    pub theme: String,
    #[serde(default = "StoryInput::default_voice_type")]
    pub voice_type: String,
}

impl StoryInput {
    pub fn default_voice_type() -> String {
        "female".to_string()
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        let fields: [(&str, &str, usize); 10] = [
            ("Character name", &self.character_name, 50),
            ("Setting", &self.setting, 100),
            ("Villain", &self.villain, 50),
            ("Special item", &self.special_item, 50),
            ("Character trait", &self.character_trait, 50),
            ("Goal", &self.goal, 100),
            ("Time period", &self.time_period, 50),
            ("Mood", &self.mood, 50),
            ("Theme", &self.theme, 100),
            ("Voice type", &self.voice_type, 20),
        ];
        for (label, value, max) in fields {
            if value.trim().is_empty() {
                return Err(GenerationError::InvalidInput(format!("{label} is required")));
            }
            if value.chars().count() > max {
                return Err(GenerationError::InvalidInput(format!(
                    "{label} must be between 1 and {max} characters"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryOutline {
    pub title: String,
    #[serde(default)]
    pub theme: String,
    pub target_pages: u32,
    pub beginning: OutlineSection,
    pub middle: OutlineSection,
    pub end: OutlineSection,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub narrative_arc: String,
    #[serde(default)]
    pub image_seed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlineSection {
    pub summary: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    pub page_count: u32,
    /// Only set for the middle section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<String>,
    /// Only set for the end section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub appearance: String,
    #[serde(default)]
    pub personality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryStructure {
    pub title: String,
    pub image_seed: i64,
    pub pages: Vec<PageStructure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageStructure {
    #[serde(default)]
    pub page_number: u32,
    pub text: String,
    pub image_prompt: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub background_music: String,
    #[serde(default)]
    pub sound_effects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSet {
    pub narration: Vec<u8>,
    pub effects: Vec<Vec<u8>>,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryPage {
    pub page_number: u32,
    pub text: String,
    pub image_prompt: String,
    pub image_url: String,
    pub narration_url: String,
    #[serde(default)]
    pub sound_effects: Vec<String>,
    #[serde(default)]
    pub sound_effect_urls: Vec<String>,
    pub mood: String,
    pub background_music: String,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    pub image_seed: i64,
    pub total_duration: f64,
    pub page_count: usize,
    pub estimated_read_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: Option<String>,
    pub input: StoryInput,
    #[serde(default)]
    pub pages: Vec<StoryPage>,
    pub metadata: Option<StoryMetadata>,
    pub status: StoryStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Story {
    pub fn pending(id: String, input: StoryInput) -> Self {
        Self {
            id,
            title: None,
            input,
            pages: Vec::new(),
            metadata: None,
            status: StoryStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn transition(&mut self, next: StoryStatus) -> Result<(), GenerationError> {
        if !self.status.can_transition_to(next) {
            return Err(GenerationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn summary(&self) -> StorySummary {
        StorySummary {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: String,
    pub title: Option<String>,
    pub status: StoryStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub story_id: String,
    pub status: StoryStatus,
    pub progress_percentage: u32,
    pub stage: String,
    pub message: String,
}

#[cfg(test)]
pub(crate) fn sample_input() -> StoryInput {
    StoryInput {
        character_name: "Mira".to_string(),
        setting: "a lantern-lit harbor".to_string(),
        villain: "the Fog King".to_string(),
        special_item: "a silver compass".to_string(),
        character_trait: "curious".to_string(),
        goal: "bring the ships home".to_string(),
        time_period: "long ago".to_string(),
        mood: "spooky".to_string(),
        theme: "courage".to_string(),
        voice_type: "female".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_one_step_at_a_time() {
        assert!(StoryStatus::Pending.can_transition_to(StoryStatus::GeneratingStory));
        assert!(!StoryStatus::Pending.can_transition_to(StoryStatus::GeneratingImages));
        assert!(!StoryStatus::GeneratingAudio.can_transition_to(StoryStatus::GeneratingImages));
        assert!(StoryStatus::Assembling.can_transition_to(StoryStatus::Completed));
    }

    #[test]
    fn failed_is_reachable_from_non_terminal_states_only() {
        assert!(StoryStatus::Pending.can_transition_to(StoryStatus::Failed));
        assert!(StoryStatus::GeneratingAudio.can_transition_to(StoryStatus::Failed));
        assert!(!StoryStatus::Completed.can_transition_to(StoryStatus::Failed));
        assert!(!StoryStatus::Failed.can_transition_to(StoryStatus::Failed));
    }

    #[test]
    fn transition_rejects_regression() {
        let mut story = Story::pending("s1".to_string(), sample_input());
        story.transition(StoryStatus::GeneratingStory).unwrap();
        let err = story.transition(StoryStatus::Pending).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidTransition { .. }));
        assert_eq!(story.status, StoryStatus::GeneratingStory);
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&StoryStatus::GeneratingImages).unwrap();
        assert_eq!(json, "\"GENERATING_IMAGES\"");
    }

    #[test]
    fn validate_rejects_blank_and_oversized_fields() {
        let mut input = sample_input();
        input.villain = "   ".to_string();
        let err = input.validate().unwrap_err().to_string();
        assert!(err.contains("Villain is required"), "{err}");

        let mut input = sample_input();
        input.setting = "x".repeat(101);
        let err = input.validate().unwrap_err().to_string();
        assert!(err.contains("Setting must be between 1 and 100"), "{err}");

        assert!(sample_input().validate().is_ok());
    }

    #[test]
    fn page_structure_defaults_optional_fields() {
        let page: PageStructure =
            serde_json::from_str(r#"{"text":"Once upon a time.","imagePrompt":"a harbor"}"#)
                .unwrap();
        assert!(page.sound_effects.is_empty());
        assert_eq!(page.mood, "");
    }
}
