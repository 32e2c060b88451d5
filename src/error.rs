//! Error taxonomy
//!
//! Sparse evidence is not an error: the sampler falls back to map-phase
//! scoring and the estimator to its prior, both without reporting.

/// 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid observation: {reason}")]
    InvalidObservation { reason: String },
    #[error("candidate pool is empty")]
    EmptyCandidatePool,
    #[error("unknown grid: {0}")]
    UnknownGrid(String),
    #[error("invalid region: {reason}")]
    InvalidRegion { reason: String },
    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported observation log version: {0}")]
    UnsupportedLogVersion(String),
}

impl EngineError {
    pub(crate) fn invalid_observation(reason: impl Into<String>) -> Self {
        Self::InvalidObservation {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_region(reason: impl Into<String>) -> Self {
        Self::InvalidRegion {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
