//! Shared fixtures for pipeline integration tests: an in-memory store seeded
//! with one organization, strategy and plan, and a generator stub that
//! answers each built-in prompt with canned output.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use cadence_db::models::{
    ContentPlan, PlanStatus, PlatformKind, PlatformStyle, SchedulingMode, TopicCategory,
};
use cadence_db::queries::organizations::NewStrategy;
use cadence_db::queries::plans::NewContentPlan;

use cadence_core::PipelineConfig;
use cadence_core::generator::{FnGenerator, GenerationError, GenerationRequest};
use cadence_core::jobs::{JobHandle, JobOutcome};
use cadence_core::pipeline::Pipeline;
use cadence_core::plan_state::PlanStateMachine;
use cadence_core::research::{ResearchQuery, ResearchService};
use cadence_core::store::{ContentStore, MemoryStore, NewTopic};

/// Knobs and recordings shared with the generator stub.
#[derive(Default)]
pub struct StubState {
    /// Fail every topic generation call.
    pub fail_topics: AtomicBool,
    /// Fail the author pass for this platform name.
    pub fail_platform: Mutex<Option<String>>,
    /// Give the second scheduled entry an unparsable date.
    pub bad_schedule_date: AtomicBool,
    /// Fail every scheduling call.
    pub fail_schedule: AtomicBool,
    /// Research calls made so far.
    pub research_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl StubState {
    pub fn prompts_containing(&self, needle: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .cloned()
            .collect()
    }
}

fn topics_json(prefix: &str, n: usize) -> String {
    let items: Vec<Value> = (1..=n)
        .map(|i| {
            json!({
                "title": format!("{prefix} {i}"),
                "description": format!("About {prefix} {i}"),
                "priority": 3,
                "reasoning": "fits the goals",
            })
        })
        .collect();
    format!("```json\n{}\n```", Value::Array(items))
}

fn schedule_json(prompt: &str, bad_date: bool) -> String {
    let ids: Vec<&str> = prompt
        .lines()
        .filter_map(|l| l.strip_prefix("- id: "))
        .filter_map(|l| l.split(" |").next())
        .collect();
    let items: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let date = if bad_date && i == 1 {
                "sometime next week".to_string()
            } else {
                format!("2026-11-{:02} 10:00", i + 2)
            };
            json!({
                "content_variant_id": id,
                "publication_date": date,
                "reason": "even spread",
            })
        })
        .collect();
    Value::Array(items).to_string()
}

fn respond(state: &StubState, request: &GenerationRequest) -> Result<String, GenerationError> {
    let p = request.prompt.as_str();
    state.prompts.lock().unwrap().push(p.to_string());

    if p.contains("Propose") && state.fail_topics.load(Ordering::SeqCst) {
        return Err(GenerationError::Unavailable("topic service down".into()));
    }
    if p.contains("distinct blog post topics") {
        return Ok(topics_json("Blog idea", 10));
    }
    if p.contains("promote this blog post") {
        return Ok(topics_json("Teaser", 3));
    }
    if p.contains("social media post topics") {
        return Ok(topics_json("Social idea", 10));
    }
    if let Some(rest) = p.strip_prefix("You are writing for ") {
        let failing = state.fail_platform.lock().unwrap().clone();
        if failing.is_some_and(|name| rest.starts_with(&format!("{name} ("))) {
            return Err(GenerationError::Failed("author refused".into()));
        }
        return Ok("# A headline\nFresh content about cold chains. #logistics\nCTA: Read more".into());
    }
    if p.contains("demanding editor") {
        return Ok("APPROVED".into());
    }
    if p.contains("publication planner") && state.fail_schedule.load(Ordering::SeqCst) {
        return Err(GenerationError::Unavailable("planner down".into()));
    }
    if p.contains("publication planner") {
        return Ok(schedule_json(p, state.bad_schedule_date.load(Ordering::SeqCst)));
    }
    Err(GenerationError::Failed(format!("unexpected prompt: {p}")))
}

struct CountingResearch {
    state: Arc<StubState>,
}

#[async_trait]
impl ResearchService for CountingResearch {
    async fn research(&self, query: &ResearchQuery) -> Result<String, String> {
        self.state.research_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} demand is shifting to same-day delivery", query.subject))
    }
}

fn style(name: &str, kind: PlatformKind) -> PlatformStyle {
    PlatformStyle {
        platform_name: name.into(),
        kind,
        label: None,
        max_length: None,
        style_rules: Vec::new(),
        hashtag_policy: None,
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub state: Arc<StubState>,
    pub pipeline: Pipeline,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        stage_retries: 1,
        stage_cooldown_secs: 0,
        call_backoff_base_secs: 0,
        brief_poll_interval_secs: 0,
        brief_poll_attempts: 1,
        ..PipelineConfig::default()
    }
}

impl Fixture {
    /// Plan with 2 blog posts and 4 social posts, correlated, auto
    /// scheduling; strategy platforms Blog, LinkedIn, Facebook and X.
    pub async fn new() -> Self {
        Self::with_mode(SchedulingMode::Auto).await
    }

    pub async fn with_mode(mode: SchedulingMode) -> Self {
        Self::build(mode, false).await
    }

    /// Like [`Fixture::new`], with a research service that counts its calls
    /// in `state.research_calls`.
    pub async fn with_research() -> Self {
        Self::build(SchedulingMode::Auto, true).await
    }

    async fn build(mode: SchedulingMode, research: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let org = store.add_organization("Acme Logistics", Some("logistics")).await;
        store
            .add_strategy(
                org.id,
                NewStrategy {
                    name: "Default".into(),
                    goals: vec!["Grow inbound leads".into()],
                    personas: vec!["Operations managers".into()],
                    tone: Some("Confident".into()),
                    forbidden_phrases: vec!["synergy".into()],
                    preferred_phrases: Vec::new(),
                    cta_rules: vec!["Link to the blog".into()],
                    platforms: vec![
                        style("Blog", PlatformKind::Blog),
                        style("LinkedIn", PlatformKind::Social),
                        style("Facebook", PlatformKind::Social),
                        style("X", PlatformKind::Social),
                    ],
                },
            )
            .await;
        let plan = store
            .add_plan(NewContentPlan {
                organization_id: org.id,
                period_label: "November 2026".into(),
                blog_posts_quota: 2,
                sm_posts_quota: 4,
                correlate_posts: true,
                scheduling_mode: mode,
                scheduling_preferences: json!({}),
            })
            .await;

        let state = Arc::new(StubState::default());
        let responder = state.clone();
        let generator = Arc::new(FnGenerator::new(move |req: &GenerationRequest| {
            respond(&responder, req)
        }));
        let pipeline = if research {
            let service = Arc::new(CountingResearch {
                state: state.clone(),
            });
            Pipeline::with_research(store.clone(), generator, &test_config(), service)
        } else {
            Pipeline::new(store.clone(), generator, &test_config())
        };

        Self {
            store,
            state,
            pipeline,
            organization_id: org.id,
            plan_id: plan.id,
        }
    }

    pub async fn plan(&self) -> ContentPlan {
        self.store.get_plan(self.plan_id).await.unwrap().unwrap()
    }

    /// Walk the plan through the graph to `target` without running stages.
    pub async fn force_status(&self, path: &[PlanStatus]) {
        let machine = PlanStateMachine::new(self.store.clone());
        for status in path {
            let plan = self.plan().await;
            machine.transition(&plan, *status).await.unwrap();
        }
    }

    /// Insert topics directly, bypassing generation.
    pub async fn insert_topics(&self, category: TopicCategory, titles: &[&str]) -> Vec<Uuid> {
        let new: Vec<NewTopic> = titles
            .iter()
            .map(|t| NewTopic {
                parent_topic_id: None,
                title: t.to_string(),
                description: format!("About {t}"),
                category,
                metadata: json!({}),
            })
            .collect();
        self.store
            .insert_topics(self.plan_id, &new, None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }
}

/// Await a job and fail the test unless it succeeded.
pub async fn succeed(handle: JobHandle) -> Value {
    match handle.wait().await {
        JobOutcome::Succeeded { detail, .. } => detail,
        other => panic!("job did not succeed: {other:?}"),
    }
}

pub fn unique(ids: &[Uuid]) -> usize {
    ids.iter().collect::<HashSet<_>>().len()
}
