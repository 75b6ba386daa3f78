//! Optional research collaborator.
//!
//! Called once when a run starts generating topics; the insights are kept
//! on the plan and reused by every later prompt, never fetched per variant.

use async_trait::async_trait;

/// Inputs to a research call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchQuery {
    /// The plan's primary subject (industry, or organization name).
    pub subject: String,
    pub organization: String,
    pub period: String,
    pub key_topics: Vec<String>,
}

#[async_trait]
pub trait ResearchService: Send + Sync {
    /// Free-form insights, or an error message. Failures never fail the
    /// context build.
    async fn research(&self, query: &ResearchQuery) -> Result<String, String>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ResearchService) {}
};

/// Research service returning fixed text. Useful for dry runs.
#[derive(Debug, Clone, Default)]
pub struct StaticResearch {
    pub insights: String,
}

#[async_trait]
impl ResearchService for StaticResearch {
    async fn research(&self, _query: &ResearchQuery) -> Result<String, String> {
        Ok(self.insights.clone())
    }
}
