use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use crate::app::model::Story;

/// A generated asset belonging to one story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    Image { page: u32 },
    Narration { page: u32 },
    Effect { name: String },
}

impl AssetRef {
    /// Path of the asset relative to the story's storage namespace.
    pub fn relative_path(&self) -> String {
        match self {
            Self::Image { page } => format!("images/page-{page}.png"),
            Self::Narration { page } => format!("audio/narration/page-{page}.mp3"),
            Self::Effect { name } => format!("audio/effects/{}.mp3", sanitize_effect_name(name)),
        }
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Creates the per-story storage namespace.
    async fn prepare_story(&self, story_id: &str) -> anyhow::Result<()>;
    async fn save_story(&self, story: &Story) -> anyhow::Result<()>;
    async fn load_story(&self, story_id: &str) -> anyhow::Result<Option<Story>>;
    async fn list_stories(&self) -> anyhow::Result<Vec<Story>>;
    /// Returns `false` when nothing was stored for `story_id`.
    async fn delete_story(&self, story_id: &str) -> anyhow::Result<bool>;

    async fn save_image(&self, story_id: &str, page: u32, bytes: &[u8]) -> anyhow::Result<()>;
    async fn save_narration(&self, story_id: &str, page: u32, bytes: &[u8])
    -> anyhow::Result<()>;
    async fn save_effect(&self, story_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()>;

    /// Resolves a stored asset for serving; `None` if it does not exist.
    async fn asset_path(&self, story_id: &str, relative: &str) -> anyhow::Result<Option<PathBuf>>;

    fn asset_url(&self, story_id: &str, asset: &AssetRef) -> String {
        format!(
            "/api/stories/{story_id}/assets/{}",
            asset.relative_path()
        )
    }
}

#[derive(Debug, Clone)]
pub struct LocalFsAssetStore {
    base_dir: PathBuf,
}

impl LocalFsAssetStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn stories_dir(&self) -> PathBuf {
        self.base_dir.join("stories")
    }

    fn story_dir(&self, story_id: &str) -> anyhow::Result<PathBuf> {
        if !is_story_id(story_id) {
            anyhow::bail!("invalid story id: {story_id:?}");
        }
        Ok(self.stories_dir().join(story_id))
    }

    fn story_json_path(&self, story_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.story_dir(story_id)?.join("story.json"))
    }

    async fn save_asset(&self, story_id: &str, asset: AssetRef, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.story_dir(story_id)?.join(asset.relative_path());
        write_bytes_atomic(&path, bytes)
            .await
            .with_context(|| format!("write asset: {}", path.display()))?;
        tracing::debug!(story_id, path = %path.display(), bytes = bytes.len(), "saved asset");
        Ok(())
    }
}

#[async_trait]
impl AssetStore for LocalFsAssetStore {
    async fn prepare_story(&self, story_id: &str) -> anyhow::Result<()> {
        let story_dir = self.story_dir(story_id)?;
        for sub in ["images", "audio/narration", "audio/effects"] {
            let dir = story_dir.join(sub);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create story dir: {}", dir.display()))?;
        }
        Ok(())
    }

    async fn save_story(&self, story: &Story) -> anyhow::Result<()> {
        let path = self.story_json_path(&story.id)?;
        write_json_atomic(&path, story)
            .await
            .context("write story.json")?;
        Ok(())
    }

    async fn load_story(&self, story_id: &str) -> anyhow::Result<Option<Story>> {
        if !is_story_id(story_id) {
            return Ok(None);
        }
        let path = self.story_json_path(story_id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn list_stories(&self) -> anyhow::Result<Vec<Story>> {
        let stories_dir = self.stories_dir();
        let mut dir = match fs::read_dir(&stories_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("list: {}", stories_dir.display()));
            }
        };

        let mut stories = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match self.load_story(name.as_ref()).await {
                Ok(Some(story)) => stories.push(story),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(story_id = %name, ?err, "skipping unreadable story");
                }
            }
        }
        Ok(stories)
    }

    async fn delete_story(&self, story_id: &str) -> anyhow::Result<bool> {
        if !is_story_id(story_id) {
            return Ok(false);
        }
        let story_dir = self.story_dir(story_id)?;
        match fs::remove_dir_all(&story_dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("remove story dir: {}", story_dir.display()))
            }
        }
    }

    async fn save_image(&self, story_id: &str, page: u32, bytes: &[u8]) -> anyhow::Result<()> {
        self.save_asset(story_id, AssetRef::Image { page }, bytes)
            .await
    }

    async fn save_narration(
        &self,
        story_id: &str,
        page: u32,
        bytes: &[u8],
    ) -> anyhow::Result<()> {
        self.save_asset(story_id, AssetRef::Narration { page }, bytes)
            .await
    }

    async fn save_effect(&self, story_id: &str, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let asset = AssetRef::Effect {
            name: name.to_string(),
        };
        self.save_asset(story_id, asset, bytes).await
    }

    async fn asset_path(&self, story_id: &str, relative: &str) -> anyhow::Result<Option<PathBuf>> {
        if !is_story_id(story_id) {
            return Ok(None);
        }
        let relative = Path::new(relative);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain || relative.as_os_str().is_empty() {
            anyhow::bail!("invalid asset path: {}", relative.display());
        }

        let path = self.story_dir(story_id)?.join(relative);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat: {}", path.display())),
        }
    }
}

pub fn sanitize_effect_name(name: &str) -> String {
    let sanitized = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    let sanitized = sanitized.trim_matches('_');
    if sanitized.is_empty() {
        "effect".to_string()
    } else {
        sanitized.to_string()
    }
}

fn is_story_id(story_id: &str) -> bool {
    uuid::Uuid::parse_str(story_id).is_ok()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    write_bytes_atomic(path, &data).await
}

async fn write_bytes_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
