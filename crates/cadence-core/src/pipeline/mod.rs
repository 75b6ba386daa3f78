//! Pipeline trigger surface.
//!
//! [`Pipeline`] owns a [`WorkerPool`] running a [`StageRunner`]. Every
//! trigger validates the current state first, performs the synchronous part
//! of the transition (plan status, revision records, rejections), then
//! dispatches a [`StageJob`] and returns its [`JobHandle`]. A trigger that
//! fails its precondition changes nothing.

mod runner;

pub use runner::StageRunner;

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::{
    ContentDraft, ContentPlan, ContentVariant, DraftStatus, PlanStatus, RevisionKind,
    SuggestedTopic, TopicCategory, TopicStatus, VariantStatus,
};

use crate::cache::TtlCache;
use crate::config::PipelineConfig;
use crate::context::ContextBuilder;
use crate::error::StageError;
use crate::generator::{RetryingGenerator, TextGenerator};
use crate::jobs::{JobHandle, StageJob};
use crate::plan_state::{PlanFailure, PlanStateMachine, Stage};
use crate::prompts::{ModelResolver, PromptLibrary, PromptRunner};
use crate::research::ResearchService;
use crate::scheduler::Scheduler;
use crate::store::{ContentStore, NewRevision};
use crate::topics::TopicGenerator;
use crate::variants::VariantGenerator;
use crate::worker::{RetryPolicy, WorkerPool};

pub struct Pipeline {
    store: Arc<dyn ContentStore>,
    machine: PlanStateMachine,
    pool: WorkerPool,
}

impl Pipeline {
    /// Build every stage from `store`, `generator` and `config` and start
    /// the worker pool. Must be called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn ContentStore>,
        generator: Arc<dyn TextGenerator>,
        config: &PipelineConfig,
    ) -> Self {
        Self::build(store, generator, config, None)
    }

    /// Like [`Pipeline::new`], with a research collaborator consulted once
    /// per topic generation run.
    pub fn with_research(
        store: Arc<dyn ContentStore>,
        generator: Arc<dyn TextGenerator>,
        config: &PipelineConfig,
        research: Arc<dyn ResearchService>,
    ) -> Self {
        Self::build(store, generator, config, Some(research))
    }

    fn build(
        store: Arc<dyn ContentStore>,
        generator: Arc<dyn TextGenerator>,
        config: &PipelineConfig,
        research: Option<Arc<dyn ResearchService>>,
    ) -> Self {
        let generator: Arc<dyn TextGenerator> = Arc::new(RetryingGenerator::new(
            generator,
            config.call_retries,
            config.call_backoff_base(),
        ));
        let prompts = Arc::new(PromptRunner::new(
            generator,
            PromptLibrary::new(store.clone(), TtlCache::new(config.cache_ttl())),
            ModelResolver::new(
                store.clone(),
                TtlCache::new(config.cache_ttl()),
                config.default_model.clone(),
            ),
        ));

        let mut context =
            ContextBuilder::new(store.clone(), TtlCache::new(config.cache_ttl()), config);
        if let Some(research) = research {
            context = context.with_research(research);
        }

        let runner = StageRunner {
            store: store.clone(),
            machine: PlanStateMachine::new(store.clone()),
            context,
            topics: TopicGenerator::new(prompts.clone()),
            variants: VariantGenerator::new(
                store.clone(),
                prompts.clone(),
                config.review_iterations,
                config.max_variants_per_platform,
                config.variant_parallelism,
            ),
            scheduler: Scheduler::new(store.clone(), prompts),
            topic_buffer: config.topic_buffer,
        };
        let pool = WorkerPool::start(
            Arc::new(runner),
            config.worker_count,
            RetryPolicy::new(config.stage_retries, config.stage_cooldown()),
        );

        Self {
            machine: PlanStateMachine::new(store.clone()),
            store,
            pool,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn state_machine(&self) -> &PlanStateMachine {
        &self.machine
    }

    /// Stop the worker pool after in-flight jobs finish.
    pub async fn shutdown(self) {
        self.pool.join().await;
    }

    // -- plan triggers ---------------------------------------------------

    /// Start topic generation for a new plan, or retry it after a topic
    /// stage failure.
    pub async fn start_generation(&self, plan_id: Uuid) -> Result<JobHandle, StageError> {
        let plan = self.machine.load(plan_id).await?;
        if !matches!(plan.status, PlanStatus::New | PlanStatus::Error) {
            return Err(StageError::precondition(format!(
                "plan {plan_id} is {}, generation can only start from new or error",
                plan.status
            )));
        }
        self.begin_stage(&plan, Stage::Topics).await
    }

    /// Run the stage that follows a human approval step, or resume the
    /// stage that failed.
    pub async fn continue_after_approval(&self, plan_id: Uuid) -> Result<JobHandle, StageError> {
        let plan = self.machine.load(plan_id).await?;
        let stage = match plan.status {
            PlanStatus::PendingBlogTopicApproval => Stage::SmTopics,
            PlanStatus::PendingFinalScheduling => Stage::Schedule,
            PlanStatus::Error => PlanFailure::from_metadata(&plan.generation_metadata)
                .map(|f| f.stage)
                .ok_or_else(|| {
                    StageError::precondition(format!(
                        "plan {plan_id} is in error without a recorded stage; reset it"
                    ))
                })?,
            other => {
                return Err(StageError::precondition(format!(
                    "plan {plan_id} is {other}, nothing to continue"
                )));
            }
        };
        self.begin_stage(&plan, stage).await
    }

    /// Reject the plan's suggested blog topics and generate new ones.
    /// Approved topics are kept.
    pub async fn regenerate_topics(&self, plan_id: Uuid) -> Result<JobHandle, StageError> {
        let plan = self.machine.load(plan_id).await?;
        if plan.status != PlanStatus::PendingBlogTopicApproval {
            return Err(StageError::precondition(format!(
                "plan {plan_id} is {}, topics can only be regenerated while awaiting approval",
                plan.status
            )));
        }
        self.machine.begin(&plan, Stage::Topics).await?;
        let rejected = match self
            .store
            .reject_suggested_topics(plan_id, Some(TopicCategory::Blog))
            .await
        {
            Ok(n) => n,
            Err(e) => return Err(self.abort_trigger(&plan, Stage::Topics, e.into()).await),
        };
        info!(plan_id = %plan_id, rejected, "suggested blog topics rejected for regeneration");
        self.dispatch_stage(plan_id, Stage::Topics, StageJob::GenerateTopics { plan_id })
            .await
    }

    /// Discard every topic, draft and scheduled post of the plan and start
    /// over from topic generation.
    pub async fn regenerate_all(&self, plan_id: Uuid) -> Result<JobHandle, StageError> {
        let plan = self.machine.load(plan_id).await?;
        if plan.status.is_generating() {
            return Err(StageError::precondition(format!(
                "plan {plan_id} is {}, wait for the running stage to finish",
                plan.status
            )));
        }
        if !PlanStateMachine::is_valid_transition(plan.status, PlanStatus::GeneratingTopics) {
            return Err(StageError::precondition(format!(
                "plan {plan_id} cannot be regenerated from {}",
                plan.status
            )));
        }

        self.machine
            .transition(&plan, PlanStatus::GeneratingTopics)
            .await?;
        if plan.status == PlanStatus::Error {
            self.machine.clear_failure(plan_id).await;
        }
        if let Err(e) = self.discard_content(plan_id).await {
            return Err(self.abort_trigger(&plan, Stage::Topics, e).await);
        }

        self.dispatch_stage(plan_id, Stage::Topics, StageJob::GenerateTopics { plan_id })
            .await
    }

    async fn discard_content(&self, plan_id: Uuid) -> Result<(), StageError> {
        let topics = self.store.deactivate_topics(plan_id, None).await?;
        let drafts = self.store.deactivate_drafts_for_plan(plan_id).await?;
        let posts = self.store.delete_scheduled_posts(plan_id).await?;
        info!(plan_id = %plan_id, topics, drafts, posts, "plan content discarded for regeneration");
        Ok(())
    }

    /// A trigger moved `plan` into `stage` and then failed before
    /// dispatching. Park the plan in `error`, resumable from the status it
    /// had before the trigger where the graph allows it.
    async fn abort_trigger(&self, plan: &ContentPlan, stage: Stage, error: StageError) -> StageError {
        let resume = if PlanStateMachine::is_valid_transition(PlanStatus::Error, plan.status) {
            plan.status
        } else {
            stage.resume_status()
        };
        if let Err(e) = self.machine.fail_resuming(plan.id, stage, resume, &error).await {
            warn!(plan_id = %plan.id, stage = %stage, error = %e, "could not record trigger failure");
        }
        error
    }

    /// Return an errored plan to the status it had before the failed stage.
    pub async fn reset(&self, plan_id: Uuid) -> Result<ContentPlan, StageError> {
        self.machine.reset(plan_id).await
    }

    async fn begin_stage(&self, plan: &ContentPlan, stage: Stage) -> Result<JobHandle, StageError> {
        self.machine.begin(plan, stage).await?;
        let job = match stage {
            Stage::Topics => StageJob::GenerateTopics { plan_id: plan.id },
            Stage::SmTopics => StageJob::GenerateSmTopics { plan_id: plan.id },
            Stage::Schedule => StageJob::Schedule { plan_id: plan.id },
        };
        self.dispatch_stage(plan.id, stage, job).await
    }

    /// Submit a plan stage job. If the pool refuses it the plan is moved to
    /// `error` so it does not stay in a running state forever.
    async fn dispatch_stage(
        &self,
        plan_id: Uuid,
        stage: Stage,
        job: StageJob,
    ) -> Result<JobHandle, StageError> {
        let handle = match self.pool.submit(job).await {
            Ok(handle) => handle,
            Err(e) => {
                self.machine.fail(plan_id, stage, &e).await?;
                return Err(e);
            }
        };
        let mut patch = serde_json::Map::new();
        patch.insert(format!("{stage}_job_id"), json!(handle.id));
        self.store
            .merge_plan_metadata(plan_id, &Value::Object(patch))
            .await?;
        info!(plan_id = %plan_id, stage = %stage, job_id = %handle.id, "stage dispatched");
        Ok(handle)
    }

    // -- topic approval --------------------------------------------------

    async fn idle_topic(&self, topic_id: Uuid) -> Result<SuggestedTopic, StageError> {
        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| StageError::not_found("topic", topic_id))?;
        let plan = self.machine.load(topic.plan_id).await?;
        if plan.status.is_generating() {
            return Err(StageError::precondition(format!(
                "plan {} is {}, topics cannot change while a stage runs",
                plan.id, plan.status
            )));
        }
        Ok(topic)
    }

    /// Approve a suggested topic and start generating its draft.
    pub async fn approve_topic(&self, topic_id: Uuid) -> Result<JobHandle, StageError> {
        let topic = self.idle_topic(topic_id).await?;
        if !self
            .store
            .transition_topic(topic.id, TopicStatus::Suggested, TopicStatus::Approved)
            .await?
        {
            return Err(StageError::precondition(format!(
                "topic {topic_id} is {}, only suggested topics can be approved",
                topic.status
            )));
        }
        info!(topic_id = %topic_id, plan_id = %topic.plan_id, "topic approved");
        self.pool.submit(StageJob::GenerateVariants { topic_id }).await
    }

    pub async fn reject_topic(&self, topic_id: Uuid) -> Result<(), StageError> {
        let topic = self.idle_topic(topic_id).await?;
        if !self
            .store
            .transition_topic(topic.id, TopicStatus::Suggested, TopicStatus::Rejected)
            .await?
        {
            return Err(StageError::precondition(format!(
                "topic {topic_id} is {}, only suggested topics can be rejected",
                topic.status
            )));
        }
        info!(topic_id = %topic_id, plan_id = %topic.plan_id, "topic rejected");
        Ok(())
    }

    // -- drafts ----------------------------------------------------------

    async fn revisable_draft(&self, draft_id: Uuid) -> Result<ContentDraft, StageError> {
        let draft = self
            .store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| StageError::not_found("draft", draft_id))?;
        if !draft.is_active {
            return Err(StageError::precondition(format!(
                "draft {draft_id} has been superseded by a newer version"
            )));
        }
        if draft.status == DraftStatus::Drafting {
            return Err(StageError::precondition(format!(
                "draft {draft_id} is still being generated"
            )));
        }
        Ok(draft)
    }

    async fn variant_snapshot(&self, draft_id: Uuid) -> Result<Value, StageError> {
        let variants = self.store.list_variants(draft_id).await?;
        Ok(json!({ "variants": variants.iter().map(variant_json).collect::<Vec<_>>() }))
    }

    /// Produce a new draft version guided by reviewer feedback.
    pub async fn request_draft_revision(
        &self,
        draft_id: Uuid,
        feedback: &str,
    ) -> Result<JobHandle, StageError> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(StageError::precondition("revision feedback is empty"));
        }
        let draft = self.revisable_draft(draft_id).await?;
        let previous_content = self.variant_snapshot(draft.id).await?;
        self.store
            .insert_revision(&NewRevision {
                draft_id: draft.id,
                variant_id: None,
                kind: RevisionKind::Feedback,
                feedback: Some(feedback.to_string()),
                previous_content,
            })
            .await?;
        info!(draft_id = %draft_id, topic_id = %draft.topic_id, "draft revision requested");
        self.pool
            .submit(StageJob::ReviseDraft {
                draft_id,
                feedback: feedback.to_string(),
            })
            .await
    }

    /// Reject a draft and generate a fresh one for the same topic.
    pub async fn regenerate_draft(
        &self,
        draft_id: Uuid,
        reason: Option<&str>,
    ) -> Result<JobHandle, StageError> {
        let draft = self.revisable_draft(draft_id).await?;
        let previous_content = self.variant_snapshot(draft.id).await?;
        self.store
            .set_draft_status(draft.id, DraftStatus::Rejected)
            .await?;
        self.store
            .insert_revision(&NewRevision {
                draft_id: draft.id,
                variant_id: None,
                kind: RevisionKind::Regenerate,
                feedback: reason.map(str::to_string),
                previous_content,
            })
            .await?;
        info!(draft_id = %draft_id, topic_id = %draft.topic_id, "draft regeneration requested");
        self.pool.submit(StageJob::RegenerateDraft { draft_id }).await
    }

    // -- variants --------------------------------------------------------

    async fn active_variant(&self, variant_id: Uuid) -> Result<ContentVariant, StageError> {
        let variant = self
            .store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StageError::not_found("variant", variant_id))?;
        let draft = self
            .store
            .get_draft(variant.draft_id)
            .await?
            .ok_or_else(|| StageError::not_found("draft", variant.draft_id))?;
        if !draft.is_active {
            return Err(StageError::precondition(format!(
                "variant {variant_id} belongs to a superseded draft"
            )));
        }
        if variant.status == VariantStatus::NeedsRevision {
            return Err(StageError::precondition(format!(
                "variant {variant_id} is being revised"
            )));
        }
        Ok(variant)
    }

    pub async fn approve_variant(&self, variant_id: Uuid) -> Result<ContentVariant, StageError> {
        let variant = self.active_variant(variant_id).await?;
        self.store
            .set_variant_status(variant.id, VariantStatus::Approved)
            .await?;

        let siblings = self.store.list_variants(variant.draft_id).await?;
        if siblings
            .iter()
            .all(|v| v.id == variant.id || v.status == VariantStatus::Approved)
        {
            self.store
                .set_draft_status(variant.draft_id, DraftStatus::Approved)
                .await?;
            info!(draft_id = %variant.draft_id, "all variants approved, draft approved");
        }
        info!(variant_id = %variant_id, platform = %variant.platform_name, "variant approved");
        self.store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StageError::not_found("variant", variant_id))
    }

    pub async fn reject_variant(&self, variant_id: Uuid) -> Result<ContentVariant, StageError> {
        let variant = self.active_variant(variant_id).await?;
        self.store
            .set_variant_status(variant.id, VariantStatus::Rejected)
            .await?;
        info!(variant_id = %variant_id, platform = %variant.platform_name, "variant rejected");
        self.store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StageError::not_found("variant", variant_id))
    }

    async fn begin_variant_revision(
        &self,
        variant: &ContentVariant,
        kind: RevisionKind,
        feedback: Option<&str>,
    ) -> Result<(), StageError> {
        self.store
            .insert_revision(&NewRevision {
                draft_id: variant.draft_id,
                variant_id: Some(variant.id),
                kind,
                feedback: feedback.map(str::to_string),
                previous_content: variant_json(variant),
            })
            .await?;
        self.store
            .set_variant_status(variant.id, VariantStatus::NeedsRevision)
            .await?;
        info!(
            variant_id = %variant.id,
            platform = %variant.platform_name,
            kind = %kind,
            "variant revision requested"
        );
        Ok(())
    }

    /// Rewrite one platform variant using reviewer feedback.
    pub async fn request_variant_revision(
        &self,
        variant_id: Uuid,
        feedback: &str,
    ) -> Result<JobHandle, StageError> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(StageError::precondition("revision feedback is empty"));
        }
        let variant = self.active_variant(variant_id).await?;
        self.begin_variant_revision(&variant, RevisionKind::Feedback, Some(feedback))
            .await?;
        self.pool
            .submit(StageJob::ReviseVariant {
                variant_id,
                feedback: feedback.to_string(),
            })
            .await
    }

    /// Generate one platform variant from scratch.
    pub async fn regenerate_variant(&self, variant_id: Uuid) -> Result<JobHandle, StageError> {
        let variant = self.active_variant(variant_id).await?;
        self.begin_variant_revision(&variant, RevisionKind::Regenerate, None)
            .await?;
        self.pool
            .submit(StageJob::RegenerateVariant { variant_id })
            .await
    }
}

fn variant_json(variant: &ContentVariant) -> Value {
    json!({
        "variant_id": variant.id,
        "platform_name": variant.platform_name,
        "content": variant.content,
        "headline": variant.headline,
        "call_to_action": variant.call_to_action,
        "hashtags": variant.hashtags,
        "status": variant.status,
        "version": variant.version,
    })
}
