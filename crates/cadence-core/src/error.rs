//! Stage-level error taxonomy.

use crate::generator::GenerationError;

/// Why a pipeline stage or trigger did not complete.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The generative service was rate limited or unreachable after
    /// call-level retries.
    #[error("external service unavailable: {0}")]
    TransientExternal(String),

    /// The generative service answered with something that could not be
    /// used at all.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The action is not allowed in the current state. Nothing was changed.
    #[error("precondition failed: {0}")]
    PreconditionViolation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: uuid::Uuid },

    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl StageError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionViolation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: uuid::Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Whether the worker pool should run the stage again after a cooldown.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal(_) | Self::Persistence(_))
    }
}

impl From<GenerationError> for StageError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::RateLimited { .. } | GenerationError::Unavailable(_) => {
                Self::TransientExternal(err.to_string())
            }
            GenerationError::Failed(msg) => Self::TransientExternal(msg),
        }
    }
}
