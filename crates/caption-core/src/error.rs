//! Error taxonomy for the caption core.

use serde::{Deserialize, Serialize};

/// Errors produced by the caption orchestration layer.
///
/// `Clone` so a single failed construction can be handed to every caller
/// waiting on the same cache slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptionError {
    #[error("resource not ready: {0}")]
    NotReady(String),

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("no prompts provided")]
    NoPromptsProvided,

    #[error("missing required agents: {}", missing.join(", "))]
    MissingRequiredAgents { missing: Vec<String> },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("failed to construct resource {resource}: {reason}")]
    ConstructionFailure { resource: String, reason: String },

    #[error("image load failed: {0}")]
    ImageLoad(String),

    #[error("preprocessing failed: {0}")]
    PreprocessingFailure(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CaptionError {
    /// Machine-readable kind, as stored on analysis records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptionError::NotReady(_) => ErrorKind::NotReady,
            CaptionError::InferenceFailure(_) => ErrorKind::InferenceFailure,
            CaptionError::NoPromptsProvided => ErrorKind::NoPromptsProvided,
            CaptionError::MissingRequiredAgents { .. } => ErrorKind::MissingRequiredAgents,
            CaptionError::Cancelled(_) => ErrorKind::Cancelled,
            CaptionError::ConstructionFailure { .. } => ErrorKind::ConstructionFailure,
            CaptionError::ImageLoad(_) => ErrorKind::ImageLoad,
            CaptionError::PreprocessingFailure(_) => ErrorKind::PreprocessingFailure,
            CaptionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Serializable error kind carried by [`crate::analysis::AnalysisRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotReady,
    InferenceFailure,
    NoPromptsProvided,
    MissingRequiredAgents,
    Cancelled,
    ConstructionFailure,
    ImageLoad,
    PreprocessingFailure,
    InvalidConfig,
}

/// Result type for caption core operations.
pub type CaptionResult<T> = std::result::Result<T, CaptionError>;
