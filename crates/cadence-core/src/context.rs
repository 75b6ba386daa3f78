//! Per-run context assembly.
//!
//! [`ContextBuilder::build`] gathers everything a stage needs to prompt the
//! generator: organization profile, the active communication strategy
//! (with defaults filled in), merged brief insights, rejected topic titles
//! and research. The result is an owned, serializable snapshot.
//!
//! Research is fetched once per run, by [`ContextBuilder::build_researched`]
//! at the start of topic generation, and kept in the plan's
//! `generation_metadata`; every later build reads it from there.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cadence_db::models::{
    BriefAnalysisStatus, CommunicationStrategy, ContentBrief, ContentPlan, Organization,
    PlatformKind, PlatformStyle,
};

use crate::cache::TtlCache;
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::prompts::Vars;
use crate::research::{ResearchQuery, ResearchService};
use crate::store::ContentStore;

/// Strategy values after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyContext {
    pub goals: Vec<String>,
    pub personas: Vec<String>,
    pub tone: String,
    pub forbidden_phrases: Vec<String>,
    pub preferred_phrases: Vec<String>,
    pub cta_rules: Vec<String>,
    pub platforms: Vec<PlatformStyle>,
}

impl Default for StrategyContext {
    fn default() -> Self {
        Self {
            goals: vec![
                "Build brand awareness".to_string(),
                "Engage the target audience".to_string(),
            ],
            personas: vec!["Industry professionals".to_string()],
            tone: "Professional and approachable".to_string(),
            forbidden_phrases: Vec::new(),
            preferred_phrases: Vec::new(),
            cta_rules: Vec::new(),
            platforms: default_platforms(),
        }
    }
}

fn default_platforms() -> Vec<PlatformStyle> {
    vec![
        PlatformStyle {
            platform_name: "Blog".to_string(),
            kind: PlatformKind::Blog,
            label: None,
            max_length: None,
            style_rules: vec!["Long-form article with a headline and subheadings".to_string()],
            hashtag_policy: None,
        },
        PlatformStyle {
            platform_name: "LinkedIn".to_string(),
            kind: PlatformKind::Social,
            label: None,
            max_length: Some(3000),
            style_rules: vec!["Open with a hook in the first line".to_string()],
            hashtag_policy: Some("3-5 relevant hashtags".to_string()),
        },
    ]
}

impl StrategyContext {
    /// Overlay a stored strategy on the defaults. Empty fields keep the
    /// default value.
    pub fn from_strategy(strategy: Option<&CommunicationStrategy>) -> Self {
        let mut ctx = Self::default();
        let Some(s) = strategy else {
            return ctx;
        };
        if !s.goals.is_empty() {
            ctx.goals = s.goals.clone();
        }
        if !s.personas.is_empty() {
            ctx.personas = s.personas.clone();
        }
        if let Some(tone) = s.tone.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            ctx.tone = tone.to_string();
        }
        ctx.forbidden_phrases = s.forbidden_phrases.clone();
        ctx.preferred_phrases = s.preferred_phrases.clone();
        ctx.cta_rules = s.cta_rules.clone();
        if !s.platforms.0.is_empty() {
            ctx.platforms = s.platforms.0.clone();
        }
        ctx
    }
}

/// Insights merged across every analyzed brief of a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefInsights {
    pub mandatory_topics: Vec<String>,
    pub content_instructions: Vec<String>,
    pub company_news: Vec<String>,
    pub key_messages: Vec<String>,
    pub key_topics: Vec<String>,
    pub priority_items: Vec<String>,
}

impl BriefInsights {
    /// Merge briefs in order; every list keeps the first occurrence of each
    /// item.
    pub fn merge<'a>(briefs: impl IntoIterator<Item = &'a ContentBrief>) -> Self {
        let mut out = Self::default();
        for brief in briefs {
            push_unique(&mut out.mandatory_topics, &brief.mandatory_topics);
            push_unique(
                &mut out.content_instructions,
                brief.content_instructions.as_slice(),
            );
            push_unique(&mut out.company_news, &brief.company_news);
            push_unique(&mut out.key_messages, &brief.key_messages);
            push_unique(&mut out.key_topics, &brief.key_topics);
            push_unique(&mut out.priority_items, &brief.priority_items);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.mandatory_topics.is_empty()
            && self.content_instructions.is_empty()
            && self.company_news.is_empty()
            && self.key_messages.is_empty()
            && self.key_topics.is_empty()
            && self.priority_items.is_empty()
    }
}

fn push_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        let item = item.trim();
        if item.is_empty() || target.iter().any(|seen| seen == item) {
            continue;
        }
        target.push(item.to_string());
    }
}

/// Immutable input shared by every stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub plan: ContentPlan,
    pub organization: Organization,
    pub strategy: StrategyContext,
    pub briefs: BriefInsights,
    /// Most recent first.
    pub rejected_topics: Vec<String>,
    pub research: Option<String>,
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join("; ")
    }
}

impl PipelineContext {
    pub fn organization_id(&self) -> Uuid {
        self.organization.id
    }

    /// The subject researched and used for generic fallback topics.
    pub fn subject(&self) -> &str {
        self.organization
            .industry
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.organization.name)
    }

    /// Values for the shared context placeholders of every template.
    pub fn prompt_vars(&self) -> Vars {
        let org = &self.organization;
        let mut description = org.description.clone().unwrap_or_default();
        if let Some(insights) = &org.website_insights {
            if !description.is_empty() {
                description.push_str(". ");
            }
            description.push_str("Website insights: ");
            description.push_str(&insights.to_string());
        }
        if description.is_empty() {
            description = "not provided".to_string();
        }

        let s = &self.strategy;
        let b = &self.briefs;
        let pairs = [
            ("organization", org.name.clone()),
            ("industry", org.industry.clone().unwrap_or_else(|| "general".to_string())),
            ("description", description),
            ("period", self.plan.period_label.clone()),
            ("goals", join_or_none(&s.goals)),
            ("personas", join_or_none(&s.personas)),
            ("tone", s.tone.clone()),
            ("mandatory_topics", join_or_none(&b.mandatory_topics)),
            ("content_instructions", join_or_none(&b.content_instructions)),
            ("company_news", join_or_none(&b.company_news)),
            ("key_messages", join_or_none(&b.key_messages)),
            ("key_topics", join_or_none(&b.key_topics)),
            ("priority_items", join_or_none(&b.priority_items)),
            (
                "research",
                self.research.clone().unwrap_or_else(|| "none".to_string()),
            ),
            ("rejected_topics", join_or_none(&self.rejected_topics)),
        ];
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

const RESEARCH_KEY: &str = "research";

fn stored_research(metadata: &serde_json::Value) -> Option<String> {
    metadata
        .get(RESEARCH_KEY)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Assembles [`PipelineContext`] values.
pub struct ContextBuilder {
    store: Arc<dyn ContentStore>,
    research: Option<Arc<dyn ResearchService>>,
    strategies: TtlCache<Uuid, StrategyContext>,
    poll_interval: Duration,
    poll_attempts: u32,
    rejected_limit: i64,
}

impl ContextBuilder {
    pub fn new(
        store: Arc<dyn ContentStore>,
        strategies: TtlCache<Uuid, StrategyContext>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            research: None,
            strategies,
            poll_interval: config.brief_poll_interval(),
            poll_attempts: config.brief_poll_attempts,
            rejected_limit: config.rejected_history_limit,
        }
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchService>) -> Self {
        self.research = Some(research);
        self
    }

    /// Drop the cached strategy of an organization, e.g. after it changed.
    pub fn invalidate_strategy(&self, organization_id: Uuid) {
        self.strategies.invalidate(&organization_id);
    }

    /// Context with the research recorded on the plan, if any.
    pub async fn build(&self, plan_id: Uuid) -> Result<PipelineContext, StageError> {
        let mut ctx = self.assemble(plan_id).await?;
        ctx.research = stored_research(&ctx.plan.generation_metadata);
        Ok(ctx)
    }

    /// Context with fresh research, recorded on the plan for the rest of
    /// the run.
    pub async fn build_researched(&self, plan_id: Uuid) -> Result<PipelineContext, StageError> {
        let mut ctx = self.assemble(plan_id).await?;
        if self.research.is_some() {
            ctx.research = self.research(&ctx).await;
            self.store
                .merge_plan_metadata(plan_id, &json!({ RESEARCH_KEY: ctx.research }))
                .await?;
        }
        Ok(ctx)
    }

    async fn assemble(&self, plan_id: Uuid) -> Result<PipelineContext, StageError> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| StageError::not_found("plan", plan_id))?;
        let organization = self
            .store
            .get_organization(plan.organization_id)
            .await?
            .ok_or_else(|| StageError::not_found("organization", plan.organization_id))?;

        let strategy = self.strategy(organization.id).await?;
        let briefs = self.analyzed_briefs(plan_id).await?;
        let briefs = BriefInsights::merge(&briefs);
        let rejected_topics = self
            .store
            .list_rejected_titles(organization.id, self.rejected_limit)
            .await?;

        let ctx = PipelineContext {
            plan,
            organization,
            strategy,
            briefs,
            rejected_topics,
            research: None,
        };
        debug!(
            plan_id = %plan_id,
            rejected = ctx.rejected_topics.len(),
            platforms = ctx.strategy.platforms.len(),
            "context built"
        );
        Ok(ctx)
    }

    async fn strategy(&self, organization_id: Uuid) -> Result<StrategyContext, StageError> {
        if let Some(cached) = self.strategies.get(&organization_id) {
            return Ok(cached);
        }
        let stored = self.store.get_active_strategy(organization_id).await?;
        if stored.is_none() {
            info!(organization_id = %organization_id, "no active strategy, using defaults");
        }
        let ctx = StrategyContext::from_strategy(stored.as_ref());
        self.strategies.insert(organization_id, ctx.clone());
        Ok(ctx)
    }

    /// Briefs with completed analysis. Waits a bounded time for pending
    /// ones, then proceeds without them.
    async fn analyzed_briefs(&self, plan_id: Uuid) -> Result<Vec<ContentBrief>, StageError> {
        let mut attempt = 0;
        loop {
            let briefs = self.store.list_briefs(plan_id).await?;
            let pending = briefs
                .iter()
                .filter(|b| b.analysis_status == BriefAnalysisStatus::Pending)
                .count();
            if pending == 0 || attempt >= self.poll_attempts {
                if pending > 0 {
                    warn!(
                        plan_id = %plan_id,
                        pending,
                        "brief analysis still pending, continuing without those briefs"
                    );
                }
                return Ok(briefs
                    .into_iter()
                    .filter(|b| b.analysis_status == BriefAnalysisStatus::Completed)
                    .collect());
            }
            attempt += 1;
            debug!(plan_id = %plan_id, pending, attempt, "waiting for brief analysis");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn research(&self, ctx: &PipelineContext) -> Option<String> {
        let service = self.research.as_ref()?;
        let query = ResearchQuery {
            subject: ctx.subject().to_string(),
            organization: ctx.organization.name.clone(),
            period: ctx.plan.period_label.clone(),
            key_topics: ctx.briefs.key_topics.clone(),
        };
        match service.research(&query).await {
            Ok(insights) if !insights.trim().is_empty() => Some(insights),
            Ok(_) => None,
            Err(e) => {
                warn!(plan_id = %ctx.plan.id, error = %e, "research failed, continuing without it");
                None
            }
        }
    }
}
