//! Topic generation.
//!
//! One call to the generator per request. Responses are unwrapped with
//! [`parse_payload`]; when nothing usable comes back the topics are
//! synthesized from brief insights so the plan always moves forward.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::TopicCategory;

use crate::context::PipelineContext;
use crate::error::StageError;
use crate::payload::{parse_payload, str_field};
use crate::prompts::{PromptRunner, Register, defaults, tasks};
use crate::store::NewTopic;

const DEFAULT_PRIORITY: i64 = 3;

/// The parent blog topic of a correlated social request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentTopic {
    pub id: Uuid,
    pub title: String,
    pub description: String,
}

/// What kind of topics to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Blog,
    /// Social topics promoting one blog topic.
    Correlated(ParentTopic),
    /// Social topics derived from brief content.
    BriefBased,
    Standalone,
}

impl TopicKind {
    pub fn category(&self) -> TopicCategory {
        match self {
            Self::Blog => TopicCategory::Blog,
            _ => TopicCategory::SocialMedia,
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Self::Blog => defaults::TOPIC_GENERATION,
            Self::Correlated(_) => defaults::SM_TOPICS_CORRELATED,
            Self::BriefBased => defaults::SM_TOPICS_BRIEF,
            Self::Standalone => defaults::SM_TOPICS_STANDALONE,
        }
    }

    fn parent_id(&self) -> Option<Uuid> {
        match self {
            Self::Correlated(parent) => Some(parent.id),
            _ => None,
        }
    }

    /// Tag stored in topic metadata as `kind`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Blog => "blog",
            Self::Correlated(_) => "blog_correlated",
            Self::BriefBased => "brief_based",
            Self::Standalone => "standalone",
        }
    }
}

/// Proposes topics for a plan.
pub struct TopicGenerator {
    runner: Arc<PromptRunner>,
}

impl TopicGenerator {
    pub fn new(runner: Arc<PromptRunner>) -> Self {
        Self { runner }
    }

    /// Generate up to `count` topics of `kind`.
    ///
    /// Generator failures propagate; unusable responses fall back to
    /// [`synthesize`]. The returned rows are not yet persisted.
    pub async fn generate(
        &self,
        ctx: &PipelineContext,
        kind: &TopicKind,
        count: usize,
    ) -> Result<Vec<NewTopic>, StageError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut vars = ctx.prompt_vars();
        vars.insert("count".into(), count.to_string());
        if let TopicKind::Correlated(parent) = kind {
            vars.insert("parent_title".into(), parent.title.clone());
            vars.insert("parent_description".into(), parent.description.clone());
        }

        let raw = self
            .runner
            .run(
                kind.template(),
                tasks::TOPICS,
                Some(ctx.organization_id()),
                &vars,
                Register::Structured,
            )
            .await?;

        let topics = match parse_payload(&raw).into_items() {
            Ok(items) => from_items(ctx, kind, &items, count),
            Err(reason) => {
                warn!(plan_id = %ctx.plan.id, kind = kind.label(), %reason, "unparsable topic response");
                Vec::new()
            }
        };
        if !topics.is_empty() {
            return Ok(topics);
        }

        let fallback = synthesize(ctx, kind, count);
        info!(
            plan_id = %ctx.plan.id,
            kind = kind.label(),
            count = fallback.len(),
            "using synthesized topics"
        );
        Ok(fallback)
    }
}

/// Case-insensitive title set used to drop duplicates and rejected titles.
struct TitleFilter {
    seen: HashSet<String>,
}

impl TitleFilter {
    fn new(ctx: &PipelineContext) -> Self {
        Self {
            seen: ctx
                .rejected_topics
                .iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
        }
    }

    /// True the first time a non-rejected title is offered.
    fn admit(&mut self, title: &str) -> bool {
        self.seen.insert(title.trim().to_lowercase())
    }
}

fn topic(kind: &TopicKind, title: &str, description: &str, metadata: Value) -> NewTopic {
    NewTopic {
        parent_topic_id: kind.parent_id(),
        title: title.to_string(),
        description: description.to_string(),
        category: kind.category(),
        metadata,
    }
}

fn from_items(ctx: &PipelineContext, kind: &TopicKind, items: &[Value], count: usize) -> Vec<NewTopic> {
    let mut filter = TitleFilter::new(ctx);
    let mut out = Vec::new();
    for item in items {
        let Some(title) = str_field(item, "title") else {
            continue;
        };
        if !filter.admit(title) {
            continue;
        }
        let priority = item
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_PRIORITY)
            .clamp(1, 5);
        let metadata = json!({
            "priority": priority,
            "source": "generated",
            "kind": kind.label(),
            "reasoning": str_field(item, "reasoning"),
        });
        out.push(topic(
            kind,
            title,
            str_field(item, "description").unwrap_or_default(),
            metadata,
        ));
        if out.len() == count {
            break;
        }
    }
    out
}

/// Deterministic topics derived from the context.
///
/// Sources in order: mandatory topics, company news, priority items, key
/// messages, then generic templates built from the organization's subject.
pub fn synthesize(ctx: &PipelineContext, kind: &TopicKind, count: usize) -> Vec<NewTopic> {
    let b = &ctx.briefs;
    let subject = ctx.subject();
    let org = ctx.organization.name.as_str();
    let generic = [
        format!("{subject} trends to watch in {}", ctx.plan.period_label),
        format!("How {org} approaches {subject}"),
        format!("Common {subject} myths, debunked"),
        format!("Behind the scenes at {org}"),
        format!("A practical {subject} checklist"),
        format!("What customers ask us about {subject}"),
    ];
    let generic_description = format!("General {subject} content for {org}.");

    let sourced = b
        .mandatory_topics
        .iter()
        .map(|t| ("mandatory", 5, t.clone(), format!("Required by the brief: {t}")))
        .chain(b.company_news.iter().map(|t| {
            ("company_news", 4, format!("News: {t}"), format!("Announce and explain: {t}"))
        }))
        .chain(
            b.priority_items
                .iter()
                .map(|t| ("priority", 4, t.clone(), format!("Priority item: {t}"))),
        )
        .chain(
            b.key_messages
                .iter()
                .map(|t| ("key_message", 3, t.clone(), format!("Reinforce the message: {t}"))),
        );
    let first_round = generic
        .iter()
        .map(|title| ("generic", 2, title.clone(), generic_description.clone()));
    // Numbered repeats make the candidate stream unbounded.
    let later_rounds = (2..).flat_map(|round| {
        generic.iter().map(move |title| {
            ("generic", 1, format!("{title} (part {round})"), String::new())
        })
    });

    let parent_note = match kind {
        TopicKind::Correlated(parent) => format!(" Promotes the article \"{}\".", parent.title),
        _ => String::new(),
    };

    let mut filter = TitleFilter::new(ctx);
    let mut out = Vec::with_capacity(count);
    for (source, priority, title, description) in sourced.chain(first_round).chain(later_rounds) {
        if out.len() == count {
            break;
        }
        if !filter.admit(&title) {
            continue;
        }
        let description = if description.is_empty() {
            generic_description.as_str()
        } else {
            description.as_str()
        };
        let metadata = json!({
            "priority": priority,
            "source": source,
            "kind": kind.label(),
            "reasoning": "synthesized from plan context",
        });
        out.push(topic(kind, &title, &format!("{description}{parent_note}"), metadata));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use cadence_db::models::{ContentPlan, Organization, PlanStatus, SchedulingMode};

    use super::*;
    use crate::cache::TtlCache;
    use crate::context::{BriefInsights, StrategyContext};
    use crate::generator::{GenerationError, ScriptedGenerator};
    use crate::prompts::{ModelResolver, PromptLibrary};
    use crate::store::MemoryStore;

    fn ctx(briefs: BriefInsights, rejected: &[&str]) -> PipelineContext {
        let now = Utc::now();
        PipelineContext {
            plan: ContentPlan {
                id: Uuid::new_v4(),
                organization_id: Uuid::new_v4(),
                period_label: "2026-11".into(),
                blog_posts_quota: 2,
                sm_posts_quota: 4,
                correlate_posts: true,
                scheduling_mode: SchedulingMode::Auto,
                scheduling_preferences: json!({}),
                generation_metadata: json!({}),
                status: PlanStatus::GeneratingTopics,
                version: 1,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            organization: Organization {
                id: Uuid::new_v4(),
                name: "Acme".into(),
                industry: Some("Logistics".into()),
                description: None,
                website_insights: None,
                created_at: now,
            },
            strategy: StrategyContext::default(),
            briefs,
            rejected_topics: rejected.iter().map(|s| s.to_string()).collect(),
            research: None,
        }
    }

    fn generator(replies: Vec<Result<String, GenerationError>>) -> TopicGenerator {
        let store = Arc::new(MemoryStore::new());
        let ttl = Duration::from_secs(60);
        let runner = PromptRunner::new(
            Arc::new(ScriptedGenerator::new(replies)),
            PromptLibrary::new(store.clone(), TtlCache::new(ttl)),
            ModelResolver::new(store, TtlCache::new(ttl), "m"),
        );
        TopicGenerator::new(Arc::new(runner))
    }

    #[tokio::test]
    async fn parses_wrapped_fenced_response() {
        let raw = "```json\n{\"topics\": [\
            {\"title\": \"Cold chain basics\", \"description\": \"d\", \"priority\": 9},\
            {\"title\": \"cold chain basics\"},\
            {\"description\": \"no title\"},\
            {\"title\": \"Rejected one\"},\
            {\"title\": \"Route planning\", \"reasoning\": \"seasonal\"}]}\n```";
        let topics = generator(vec![Ok(raw.into())])
            .generate(&ctx(BriefInsights::default(), &["REJECTED ONE"]), &TopicKind::Blog, 5)
            .await
            .unwrap();
        let titles: Vec<_> = topics.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Cold chain basics", "Route planning"]);
        assert_eq!(topics[0].metadata["priority"], 5);
        assert_eq!(topics[1].metadata["reasoning"], "seasonal");
        assert!(topics.iter().all(|t| t.category == TopicCategory::Blog));
    }

    #[tokio::test]
    async fn truncates_to_count() {
        let raw = r#"[{"title": "A"}, {"title": "B"}, {"title": "C"}]"#;
        let topics = generator(vec![Ok(raw.into())])
            .generate(&ctx(BriefInsights::default(), &[]), &TopicKind::Standalone, 2)
            .await
            .unwrap();
        assert_eq!(topics.len(), 2);
        assert!(topics.iter().all(|t| t.category == TopicCategory::SocialMedia));
    }

    #[tokio::test]
    async fn garbage_falls_back_in_source_order() {
        let briefs = BriefInsights {
            mandatory_topics: vec!["Safety week".into()],
            company_news: vec!["New depot".into()],
            priority_items: vec!["EV fleet".into()],
            key_messages: vec!["Reliable delivery".into()],
            ..BriefInsights::default()
        };
        let topics = generator(vec![Ok("I cannot help with that".into())])
            .generate(&ctx(briefs, &[]), &TopicKind::Blog, 6)
            .await
            .unwrap();
        let sources: Vec<_> = topics
            .iter()
            .map(|t| t.metadata["source"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            sources,
            vec!["mandatory", "company_news", "priority", "key_message", "generic", "generic"]
        );
        assert_eq!(topics[0].title, "Safety week");
    }

    #[test]
    fn fallback_fills_any_count() {
        let c = ctx(BriefInsights::default(), &[]);
        let topics = synthesize(&c, &TopicKind::Standalone, 15);
        assert_eq!(topics.len(), 15);
        let unique: HashSet<_> = topics.iter().map(|t| t.title.to_lowercase()).collect();
        assert_eq!(unique.len(), 15);
    }

    #[tokio::test]
    async fn correlated_topics_carry_parent() {
        let parent = ParentTopic {
            id: Uuid::new_v4(),
            title: "Cold chain basics".into(),
            description: "d".into(),
        };
        let topics = generator(vec![Ok("[]".into())])
            .generate(
                &ctx(BriefInsights::default(), &[]),
                &TopicKind::Correlated(parent.clone()),
                1,
            )
            .await
            .unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].parent_topic_id, Some(parent.id));
        assert!(topics[0].description.contains("Cold chain basics"));
    }

    #[tokio::test]
    async fn generator_failure_propagates() {
        let err = generator(vec![Err(GenerationError::Unavailable("down".into()))])
            .generate(&ctx(BriefInsights::default(), &[]), &TopicKind::Blog, 3)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn zero_count_skips_the_call() {
        let topics = generator(vec![])
            .generate(&ctx(BriefInsights::default(), &[]), &TopicKind::Blog, 0)
            .await
            .unwrap();
        assert!(topics.is_empty());
    }
}
