//! Generative text service seam.
//!
//! ```text
//! stage ──> RetryingGenerator ──> GeneratorRegistry ──"anthropic/…"──> AnthropicGenerator
//!                                                   └──"claude-cli/…"─> ClaudeCliGenerator
//! ```
//!
//! Every stage talks to a `dyn TextGenerator`. The registry routes a
//! `provider/model` identifier to a named adapter; the retrying wrapper
//! adds call-level backoff for rate limits.

pub mod anthropic;
pub mod claude_cli;
pub mod registry;
pub mod retry;
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;

pub use anthropic::AnthropicGenerator;
pub use claude_cli::ClaudeCliGenerator;
pub use registry::GeneratorRegistry;
pub use retry::RetryingGenerator;
pub use scripted::{FnGenerator, ScriptedGenerator};

/// Temperature requested by stages that expect structured output.
pub const STRUCTURED_TEMPERATURE: f32 = 0.2;

/// Temperature requested for prose.
pub const CREATIVE_TEMPERATURE: f32 = 0.7;

/// A single completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Model identifier, optionally prefixed with `provider/`.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Low-temperature request for JSON-producing stages.
    pub fn structured(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature: STRUCTURED_TEMPERATURE,
            max_tokens: 4096,
        }
    }

    /// Request for free-form content.
    pub fn creative(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature: CREATIVE_TEMPERATURE,
            max_tokens: 4096,
        }
    }
}

/// Failure reported by a generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("generation failed: {0}")]
    Failed(String),
}

/// A generative text backend.
///
/// Object-safe so adapters can be stored as `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Adapter name, used as the provider prefix in model identifiers.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn TextGenerator) {}
};
