use crate::app::model::StoryStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Outline,
    FullStory,
    Images,
    Audio,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Outline => "outline generation",
            Self::FullStory => "full story generation",
            Self::Images => "image generation",
            Self::Audio => "audio generation",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by the generation pipeline and its caller-facing operations.
///
/// Collaborators report `anyhow::Error`; the orchestrator converts them at each
/// phase boundary so that callers can match on the failure kind.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("invalid story input: {0}")]
    InvalidInput(String),

    #[error("{phase} failed: {message}")]
    Provider {
        phase: Phase,
        transient: bool,
        message: String,
    },

    #[error("assembly contract violated: {0}")]
    AssemblyContract(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("story not found: {0}")]
    NotFound(String),

    #[error("story is still generating: {0}")]
    InProgress(String),

    #[error("generation queue is full ({capacity} runs already waiting)")]
    QueueFull { capacity: usize },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: StoryStatus, to: StoryStatus },
}

impl GenerationError {
    pub fn fatal(phase: Phase, err: &anyhow::Error) -> Self {
        Self::Provider {
            phase,
            transient: false,
            message: format!("{err:#}"),
        }
    }

    pub fn transient(phase: Phase, err: &anyhow::Error) -> Self {
        Self::Provider {
            phase,
            transient: true,
            message: format!("{err:#}"),
        }
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                transient: true,
                ..
            }
        )
    }
}
