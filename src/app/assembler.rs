use crate::app::asset_store::{AssetRef, AssetStore};
use crate::app::error::GenerationError;
use crate::app::model::{AudioSet, Story, StoryMetadata, StoryPage, StoryStructure};

/// Fills `story.pages` and `story.metadata` from the generated structure and audio.
pub fn assemble(
    story: &mut Story,
    structure: &StoryStructure,
    audio: &[AudioSet],
    store: &dyn AssetStore,
) -> Result<(), GenerationError> {
    if structure.pages.len() != audio.len() {
        tracing::error!(
            story_id = %story.id,
            pages = structure.pages.len(),
            audio_sets = audio.len(),
            "page and audio counts differ"
        );
        return Err(GenerationError::AssemblyContract(format!(
            "{} story pages but {} audio sets",
            structure.pages.len(),
            audio.len()
        )));
    }

    let mut total_duration = 0.0;
    let mut pages = Vec::with_capacity(structure.pages.len());
    for (idx, (page, set)) in structure.pages.iter().zip(audio).enumerate() {
        let page_number = u32::try_from(idx + 1)
            .map_err(|_| GenerationError::AssemblyContract("too many pages".to_string()))?;
        let sound_effect_urls = page
            .sound_effects
            .iter()
            .map(|name| {
                store.asset_url(
                    &story.id,
                    &AssetRef::Effect {
                        name: name.clone(),
                    },
                )
            })
            .collect();

        total_duration += set.duration;
        pages.push(StoryPage {
            page_number,
            text: page.text.clone(),
            image_prompt: page.image_prompt.clone(),
            image_url: store.asset_url(&story.id, &AssetRef::Image { page: page_number }),
            narration_url: store.asset_url(&story.id, &AssetRef::Narration { page: page_number }),
            sound_effects: page.sound_effects.clone(),
            sound_effect_urls,
            mood: page.mood.clone(),
            background_music: page.background_music.clone(),
            duration: set.duration,
        });
    }

    story.metadata = Some(StoryMetadata {
        image_seed: structure.image_seed,
        total_duration,
        page_count: pages.len(),
        estimated_read_time: format_duration(total_duration),
    });
    story.pages = pages;
    tracing::debug!(story_id = %story.id, total_duration, "story assembled");
    Ok(())
}

/// Renders whole seconds as `m:ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::asset_store::LocalFsAssetStore;
    use crate::app::model::{PageStructure, sample_input};

    fn page(text: &str, effects: &[&str]) -> PageStructure {
        PageStructure {
            page_number: 0,
            text: text.to_string(),
            image_prompt: format!("picture of {text}"),
            mood: "calm".to_string(),
            background_music: "journey".to_string(),
            sound_effects: effects.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn audio(duration: f64) -> AudioSet {
        AudioSet {
            narration: b"mp3".to_vec(),
            effects: Vec::new(),
            duration,
        }
    }

    #[test]
    fn format_duration_truncates_to_minutes_and_seconds() {
        assert_eq!(format_duration(125.0), "2:05");
        assert_eq!(format_duration(59.4), "0:59");
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(f64::NAN), "0:00");
    }

    #[test]
    fn builds_numbered_pages_with_urls_and_metadata() {
        let store = LocalFsAssetStore::new("data");
        let mut story = Story::pending("story-1".to_string(), sample_input());
        let structure = StoryStructure {
            title: "Harbor Lights".to_string(),
            image_seed: 4242,
            pages: vec![page("a", &[]), page("b", &["Wolf Howl"]), page("c", &[])],
        };

        assemble(
            &mut story,
            &structure,
            &[audio(60.0), audio(45.5), audio(20.0)],
            &store,
        )
        .unwrap();

        let numbers: Vec<u32> = story.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(
            story.pages[1].image_url,
            "/api/stories/story-1/assets/images/page-2.png"
        );
        assert_eq!(
            story.pages[1].sound_effect_urls,
            vec!["/api/stories/story-1/assets/audio/effects/wolf_howl.mp3".to_string()]
        );
        let metadata = story.metadata.unwrap();
        assert_eq!(metadata.page_count, 3);
        assert_eq!(metadata.image_seed, 4242);
        assert_eq!(metadata.estimated_read_time, "2:05");
    }

    #[test]
    fn mismatched_lengths_are_a_contract_error() {
        let store = LocalFsAssetStore::new("data");
        let mut story = Story::pending("story-1".to_string(), sample_input());
        let structure = StoryStructure {
            title: "t".to_string(),
            image_seed: 1,
            pages: vec![page("a", &[]), page("b", &[])],
        };

        let err = assemble(&mut story, &structure, &[audio(1.0)], &store).unwrap_err();
        assert!(matches!(err, GenerationError::AssemblyContract(_)));
        assert!(story.pages.is_empty());
        assert!(story.metadata.is_none());
    }
}
