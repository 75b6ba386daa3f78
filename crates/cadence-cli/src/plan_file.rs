//! TOML format accepted by `cadence plan create`.
//!
//! ```toml
//! [organization]
//! name = "Acme Logistics"
//! industry = "logistics"
//!
//! [strategy]
//! goals = ["Grow inbound leads"]
//! [[strategy.platforms]]
//! platform_name = "LinkedIn"
//! kind = "social"
//!
//! [plan]
//! period_label = "November 2026"
//! blog_posts_quota = 4
//! sm_posts_quota = 12
//!
//! [correlation]
//! sm_posts_per_blog = 2
//!
//! [[briefs]]
//! title = "Q4 launch"
//! key_messages = ["Same-day delivery in three new cities"]
//! ```
//!
//! An `[organization]` table with an `id` reuses an existing organization;
//! otherwise a new one is created and `[strategy]` is required.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use cadence_db::models::{BriefAnalysisStatus, PlatformStyle, SchedulingMode};
use cadence_db::queries::correlation_rules::NewCorrelationRule;
use cadence_db::queries::organizations::{NewBrief, NewStrategy};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub organization: OrganizationDef,
    pub strategy: Option<StrategyDef>,
    pub plan: PlanDef,
    pub correlation: Option<CorrelationDef>,
    #[serde(default)]
    pub briefs: Vec<BriefDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationDef {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub industry: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyDef {
    #[serde(default = "default_strategy_name")]
    pub name: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub personas: Vec<String>,
    pub tone: Option<String>,
    #[serde(default)]
    pub forbidden_phrases: Vec<String>,
    #[serde(default)]
    pub preferred_phrases: Vec<String>,
    #[serde(default)]
    pub cta_rules: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformStyle>,
}

fn default_strategy_name() -> String {
    "Default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanDef {
    pub period_label: String,
    pub blog_posts_quota: i32,
    pub sm_posts_quota: i32,
    #[serde(default = "default_true")]
    pub correlate_posts: bool,
    #[serde(default = "default_mode")]
    pub scheduling_mode: SchedulingMode,
    #[serde(default)]
    pub scheduling_preferences: Option<Value>,
}

fn default_true() -> bool {
    true
}

fn default_mode() -> SchedulingMode {
    SchedulingMode::Auto
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationDef {
    #[serde(default)]
    pub sm_posts_per_blog: i32,
    #[serde(default)]
    pub brief_based_sm_posts: i32,
    #[serde(default)]
    pub standalone_sm_posts: i32,
    /// Platform name to post count.
    #[serde(default)]
    pub platform_overrides: Option<Value>,
    pub correlation_strength: Option<String>,
    pub timing_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BriefDef {
    pub title: String,
    #[serde(default)]
    pub mandatory_topics: Vec<String>,
    pub content_instructions: Option<String>,
    #[serde(default)]
    pub company_news: Vec<String>,
    #[serde(default)]
    pub key_messages: Vec<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub priority_items: Vec<String>,
}

/// Parse and validate a plan file.
pub fn parse_plan_file(content: &str) -> Result<PlanFile> {
    let file: PlanFile = toml::from_str(content).context("invalid plan TOML")?;
    file.validate()?;
    Ok(file)
}

impl PlanFile {
    fn validate(&self) -> Result<()> {
        match (&self.organization.id, &self.organization.name) {
            (Some(_), Some(_)) => bail!("organization: give either id or name, not both"),
            (None, None) => bail!("organization: id or name is required"),
            (None, Some(name)) if name.trim().is_empty() => {
                bail!("organization: name must not be empty")
            }
            (None, Some(_)) if self.strategy.is_none() => {
                bail!("a new organization needs a [strategy] table")
            }
            _ => {}
        }
        if self.plan.period_label.trim().is_empty() {
            bail!("plan: period_label must not be empty");
        }
        if self.plan.blog_posts_quota < 0 || self.plan.sm_posts_quota < 0 {
            bail!("plan: quotas must not be negative");
        }
        if let Some(strategy) = &self.strategy {
            if strategy.platforms.is_empty() {
                bail!("strategy: at least one platform is required");
            }
            if let Some(style) = strategy
                .platforms
                .iter()
                .find(|p| p.platform_name.trim().is_empty())
            {
                bail!("strategy: platform with empty name ({:?})", style.kind);
            }
        }
        if let Some(rule) = &self.correlation {
            if rule.sm_posts_per_blog < 0
                || rule.brief_based_sm_posts < 0
                || rule.standalone_sm_posts < 0
            {
                bail!("correlation: counts must not be negative");
            }
            if let Some(overrides) = &rule.platform_overrides {
                let valid = overrides
                    .as_object()
                    .is_some_and(|m| m.values().all(|v| v.as_u64().is_some()));
                if !valid {
                    bail!("correlation: platform_overrides must map names to non-negative integers");
                }
            }
        }
        for brief in &self.briefs {
            if brief.title.trim().is_empty() {
                bail!("briefs: title must not be empty");
            }
        }
        Ok(())
    }
}

impl StrategyDef {
    pub fn to_new(&self) -> NewStrategy {
        NewStrategy {
            name: self.name.clone(),
            goals: self.goals.clone(),
            personas: self.personas.clone(),
            tone: self.tone.clone(),
            forbidden_phrases: self.forbidden_phrases.clone(),
            preferred_phrases: self.preferred_phrases.clone(),
            cta_rules: self.cta_rules.clone(),
            platforms: self.platforms.clone(),
        }
    }
}

impl CorrelationDef {
    pub fn to_new(&self) -> NewCorrelationRule {
        NewCorrelationRule {
            sm_posts_per_blog: self.sm_posts_per_blog,
            brief_based_sm_posts: self.brief_based_sm_posts,
            standalone_sm_posts: self.standalone_sm_posts,
            platform_overrides: self.platform_overrides.clone().unwrap_or(Value::Null),
            correlation_strength: self.correlation_strength.clone(),
            timing_hint: self.timing_hint.clone(),
        }
    }
}

impl BriefDef {
    /// Briefs written by hand are already analyzed.
    pub fn to_new(&self) -> NewBrief {
        NewBrief {
            title: self.title.clone(),
            analysis_status: Some(BriefAnalysisStatus::Completed),
            mandatory_topics: self.mandatory_topics.clone(),
            content_instructions: self.content_instructions.clone(),
            company_news: self.company_news.clone(),
            key_messages: self.key_messages.clone(),
            key_topics: self.key_topics.clone(),
            priority_items: self.priority_items.clone(),
        }
    }
}
