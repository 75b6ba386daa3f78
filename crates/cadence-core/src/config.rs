//! Pipeline tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for stage execution, retries and generation sizes.
///
/// Deserializes from the `[pipeline]` table of the CLI config file; every
/// field is optional there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Extra blog topics generated beyond the quota to leave room for selection.
    pub topic_buffer: u32,
    /// Maximum variants per normalized platform name.
    pub max_variants_per_platform: usize,
    /// Reviewer/improve rounds in the author-reviewer loop.
    pub review_iterations: usize,
    pub brief_poll_interval_secs: u64,
    pub brief_poll_attempts: u32,
    /// Call-level retries for rate-limited generation requests.
    pub call_retries: u32,
    pub call_backoff_base_secs: u64,
    /// Stage-level retries after the first attempt.
    pub stage_retries: u32,
    pub stage_cooldown_secs: u64,
    pub worker_count: usize,
    /// Platforms generated concurrently for a single draft.
    pub variant_parallelism: usize,
    pub cache_ttl_secs: u64,
    /// Model used when no assignment exists for a task.
    pub default_model: String,
    /// Rejected topic titles fed back into topic generation.
    pub rejected_history_limit: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic_buffer: 3,
            max_variants_per_platform: 2,
            review_iterations: 2,
            brief_poll_interval_secs: 5,
            brief_poll_attempts: 12,
            call_retries: 3,
            call_backoff_base_secs: 10,
            stage_retries: 2,
            stage_cooldown_secs: 60,
            worker_count: 4,
            variant_parallelism: 3,
            cache_ttl_secs: 300,
            default_model: "claude-sonnet-4-5".to_string(),
            rejected_history_limit: 50,
        }
    }
}

impl PipelineConfig {
    pub fn brief_poll_interval(&self) -> Duration {
        Duration::from_secs(self.brief_poll_interval_secs)
    }

    pub fn call_backoff_base(&self) -> Duration {
        Duration::from_secs(self.call_backoff_base_secs)
    }

    pub fn stage_cooldown(&self) -> Duration {
        Duration::from_secs(self.stage_cooldown_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
