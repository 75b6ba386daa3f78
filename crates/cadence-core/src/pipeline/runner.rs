//! Stage execution: what each [`StageJob`] does once a worker picks it up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use cadence_db::models::{
    ContentDraft, DraftStatus, PlatformKind, SchedulingMode, SuggestedTopic, TopicCategory,
    TopicStatus,
};

use crate::context::ContextBuilder;
use crate::correlation;
use crate::error::StageError;
use crate::jobs::StageJob;
use crate::plan_state::{PlanStateMachine, Stage};
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::store::{ContentStore, NewTopic, TopicFilter};
use crate::topics::{ParentTopic, TopicGenerator, TopicKind};
use crate::variants::{
    RevisionInput, VariantGenerator, eligible_platforms, normalize_platform_name, style_for,
};
use crate::worker::JobRunner;

/// Runs stage jobs against the store and generators.
pub struct StageRunner {
    pub(crate) store: Arc<dyn ContentStore>,
    pub(crate) machine: PlanStateMachine,
    pub(crate) context: ContextBuilder,
    pub(crate) topics: TopicGenerator,
    pub(crate) variants: VariantGenerator,
    pub(crate) scheduler: Scheduler,
    pub(crate) topic_buffer: u32,
}

fn quota(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

impl StageRunner {
    async fn running_plan(&self, plan_id: Uuid, stage: Stage) -> Result<(), StageError> {
        let plan = self.machine.load(plan_id).await?;
        if plan.status != stage.running_status() {
            return Err(StageError::precondition(format!(
                "plan {plan_id} is {}, expected {}",
                plan.status,
                stage.running_status()
            )));
        }
        Ok(())
    }

    /// Deactivate topics left behind by an earlier attempt of this job.
    async fn discard_partial_topics(&self, plan_id: Uuid, job_id: Uuid) -> Result<(), StageError> {
        let removed = self.store.deactivate_topics(plan_id, Some(job_id)).await?;
        if removed > 0 {
            info!(plan_id = %plan_id, removed, "discarded topics from an earlier attempt");
        }
        Ok(())
    }

    async fn generate_blog_topics(&self, job_id: Uuid, plan_id: Uuid) -> Result<Value, StageError> {
        self.running_plan(plan_id, Stage::Topics).await?;
        self.discard_partial_topics(plan_id, job_id).await?;
        let ctx = self.context.build_researched(plan_id).await?;

        let approved = self
            .store
            .list_topics(
                plan_id,
                TopicFilter {
                    category: Some(TopicCategory::Blog),
                    status: Some(TopicStatus::Approved),
                },
            )
            .await?
            .len();
        let needed = quota(ctx.plan.blog_posts_quota).saturating_sub(approved as u32);
        let count = needed.saturating_add(self.topic_buffer) as usize;

        let topics = self.topics.generate(&ctx, &TopicKind::Blog, count).await?;
        let stored = self.store.insert_topics(plan_id, &topics, Some(job_id)).await?;
        self.store
            .merge_plan_metadata(
                plan_id,
                &json!({
                    "blog_topics_generated": stored.len(),
                    "topics_generated_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        self.machine.finish(plan_id, Stage::Topics).await?;
        info!(plan_id = %plan_id, created = stored.len(), "blog topics generated");
        Ok(json!({ "stage": Stage::Topics, "created": stored.len() }))
    }

    async fn generate_social_topics(&self, job_id: Uuid, plan_id: Uuid) -> Result<Value, StageError> {
        self.running_plan(plan_id, Stage::SmTopics).await?;
        self.discard_partial_topics(plan_id, job_id).await?;
        let ctx = self.context.build(plan_id).await?;

        let blog_topics = self
            .store
            .list_topics(
                plan_id,
                TopicFilter {
                    category: Some(TopicCategory::Blog),
                    status: Some(TopicStatus::Approved),
                },
            )
            .await?;
        let rule = self.store.get_correlation_rule(plan_id).await?;
        let split = correlation::compute(
            blog_topics.len() as u32,
            quota(ctx.plan.sm_posts_quota),
            ctx.plan.correlate_posts,
            rule.as_ref(),
        );

        let social_platforms: Vec<String> =
            eligible_platforms(&ctx.strategy.platforms, PlatformKind::Social, false, 1)
                .into_iter()
                .map(|s| s.platform_name)
                .collect();
        let overrides = rule
            .as_ref()
            .map(|r| r.platform_overrides.clone())
            .unwrap_or(Value::Null);
        let distribution = correlation::distribute(split.total, &overrides, &social_platforms);

        let mut new_topics: Vec<NewTopic> = Vec::new();
        if split.sm_posts_per_blog > 0 {
            for blog in &blog_topics {
                let kind = TopicKind::Correlated(ParentTopic {
                    id: blog.id,
                    title: blog.title.clone(),
                    description: blog.description.clone(),
                });
                let batch = self
                    .topics
                    .generate(&ctx, &kind, split.sm_posts_per_blog as usize)
                    .await?;
                new_topics.extend(batch);
            }
        }
        for (kind, count) in [
            (TopicKind::BriefBased, split.brief_correlated),
            (TopicKind::Standalone, split.standalone),
        ] {
            let batch = self.topics.generate(&ctx, &kind, count as usize).await?;
            new_topics.extend(batch);
        }

        let stored = self.store.insert_topics(plan_id, &new_topics, Some(job_id)).await?;
        self.store
            .merge_plan_metadata(
                plan_id,
                &json!({
                    "correlation": split,
                    "sm_distribution": distribution,
                    "sm_topics_generated": stored.len(),
                }),
            )
            .await?;
        self.machine.finish(plan_id, Stage::SmTopics).await?;
        info!(
            plan_id = %plan_id,
            blog_topics = blog_topics.len(),
            blog_correlated = split.blog_correlated,
            brief_correlated = split.brief_correlated,
            standalone = split.standalone,
            created = stored.len(),
            "social topics generated"
        );
        Ok(json!({
            "stage": Stage::SmTopics,
            "created": stored.len(),
            "correlation": split,
        }))
    }

    async fn schedule(&self, plan_id: Uuid) -> Result<Value, StageError> {
        self.running_plan(plan_id, Stage::Schedule).await?;
        let ctx = self.context.build(plan_id).await?;

        let report = if ctx.plan.scheduling_mode == SchedulingMode::Manual {
            info!(plan_id = %plan_id, "manual scheduling, nothing to generate");
            ScheduleReport {
                approved: 0,
                scheduled: 0,
                skipped: Vec::new(),
            }
        } else {
            self.scheduler.schedule(&ctx).await?
        };
        self.store
            .merge_plan_metadata(
                plan_id,
                &json!({
                    "scheduled_posts": report.scheduled,
                    "schedule_skipped": report.skipped.len(),
                }),
            )
            .await?;
        self.machine.finish(plan_id, Stage::Schedule).await?;
        Ok(json!({ "stage": Stage::Schedule, "report": report }))
    }

    async fn load_topic(&self, topic_id: Uuid) -> Result<SuggestedTopic, StageError> {
        self.store
            .get_topic(topic_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or_else(|| StageError::not_found("topic", topic_id))
    }

    async fn load_draft(&self, draft_id: Uuid) -> Result<ContentDraft, StageError> {
        self.store
            .get_draft(draft_id)
            .await?
            .ok_or_else(|| StageError::not_found("draft", draft_id))
    }

    /// The draft this job writes into: the active draft when an earlier
    /// attempt of the same job created it, emptied of that attempt's
    /// variants, otherwise a new one.
    async fn draft_for_job(&self, topic_id: Uuid, job_id: Uuid) -> Result<ContentDraft, StageError> {
        if let Some(active) = self.store.get_active_draft(topic_id).await? {
            if active.job_id == Some(job_id) {
                let removed = self.store.delete_variants(active.id).await?;
                if removed > 0 {
                    info!(draft_id = %active.id, removed, "discarded variants from an earlier attempt");
                }
                return Ok(active);
            }
        }
        Ok(self.store.create_draft(topic_id, Some(job_id)).await?)
    }

    async fn generate_draft(
        &self,
        job_id: Uuid,
        topic: &SuggestedTopic,
        revision: Option<&RevisionInput>,
    ) -> Result<Value, StageError> {
        let draft = self.draft_for_job(topic.id, job_id).await?;
        let ctx = self.context.build(topic.plan_id).await?;
        let report = self
            .variants
            .generate_for_draft(&ctx, topic, &draft, revision)
            .await?;
        Ok(json!(report))
    }

    async fn generate_variants(&self, job_id: Uuid, topic_id: Uuid) -> Result<Value, StageError> {
        let topic = self.load_topic(topic_id).await?;
        if topic.status != TopicStatus::Approved {
            return Err(StageError::precondition(format!(
                "topic {topic_id} is {}, only approved topics get drafts",
                topic.status
            )));
        }
        self.generate_draft(job_id, &topic, None).await
    }

    async fn revise_draft(
        &self,
        job_id: Uuid,
        draft_id: Uuid,
        feedback: Option<&str>,
    ) -> Result<Value, StageError> {
        let old = self.load_draft(draft_id).await?;
        let topic = self.load_topic(old.topic_id).await?;
        match feedback {
            Some(feedback) => {
                let mut previous = HashMap::new();
                for variant in self.store.list_variants(old.id).await? {
                    previous
                        .entry(normalize_platform_name(&variant.platform_name))
                        .or_insert(variant.content);
                }
                let input = RevisionInput {
                    feedback: Some(feedback.to_string()),
                    previous,
                };
                self.generate_draft(job_id, &topic, Some(&input)).await
            }
            None => self.generate_draft(job_id, &topic, None).await,
        }
    }

    async fn revise_variant(&self, variant_id: Uuid, feedback: Option<&str>) -> Result<Value, StageError> {
        let variant = self
            .store
            .get_variant(variant_id)
            .await?
            .ok_or_else(|| StageError::not_found("variant", variant_id))?;
        let draft = self.load_draft(variant.draft_id).await?;
        let topic = self.load_topic(draft.topic_id).await?;
        let ctx = self.context.build(topic.plan_id).await?;

        let style = style_for(&ctx, &variant.platform_name, topic.category.platform_kind());
        let base = self.variants.correlation_guidance(&topic).await?;
        let guidance = match feedback {
            Some(feedback) => RevisionInput {
                feedback: Some(feedback.to_string()),
                previous: HashMap::from([(
                    normalize_platform_name(&variant.platform_name),
                    variant.content.clone(),
                )]),
            }
            .guidance_for(&base, &variant.platform_name),
            None => base,
        };

        let content = self.variants.generate_one(&ctx, &topic, &style, &guidance).await?;
        let updated = self.store.replace_variant_content(variant_id, &content).await?;
        info!(
            variant_id = %variant_id,
            platform = %updated.platform_name,
            version = updated.version,
            "variant regenerated"
        );
        Ok(json!({ "variant_id": updated.id, "version": updated.version }))
    }

    /// Mark the draft a failed draft job was writing as failed.
    async fn fail_job_draft(&self, job_id: Uuid, topic_id: Uuid) -> Result<(), StageError> {
        if let Some(draft) = self.store.get_active_draft(topic_id).await? {
            if draft.job_id == Some(job_id) {
                self.store.set_draft_status(draft.id, DraftStatus::Failed).await?;
                warn!(draft_id = %draft.id, job_id = %job_id, "draft marked failed");
            }
        }
        Ok(())
    }

    async fn cleanup(&self, job_id: Uuid, job: &StageJob, error: &StageError) -> Result<(), StageError> {
        if let Some((plan_id, stage)) = job.plan_stage() {
            if stage != Stage::Schedule {
                let plan = self.machine.load(plan_id).await?;
                if plan.status == stage.running_status() {
                    self.discard_partial_topics(plan_id, job_id).await?;
                }
            }
            self.machine.fail(plan_id, stage, error).await?;
            return Ok(());
        }
        match job {
            StageJob::GenerateVariants { topic_id } => {
                self.fail_job_draft(job_id, *topic_id).await?;
            }
            StageJob::ReviseDraft { draft_id, .. } | StageJob::RegenerateDraft { draft_id } => {
                let draft = self.load_draft(*draft_id).await?;
                self.fail_job_draft(job_id, draft.topic_id).await?;
            }
            StageJob::ReviseVariant { variant_id, .. } | StageJob::RegenerateVariant { variant_id } => {
                warn!(
                    variant_id = %variant_id,
                    error = %error,
                    "variant revision failed, variant left in needs_revision"
                );
            }
            StageJob::GenerateTopics { .. }
            | StageJob::GenerateSmTopics { .. }
            | StageJob::Schedule { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl JobRunner for StageRunner {
    async fn run(&self, job_id: Uuid, job: &StageJob) -> Result<Value, StageError> {
        match job {
            StageJob::GenerateTopics { plan_id } => self.generate_blog_topics(job_id, *plan_id).await,
            StageJob::GenerateSmTopics { plan_id } => {
                self.generate_social_topics(job_id, *plan_id).await
            }
            StageJob::Schedule { plan_id } => self.schedule(*plan_id).await,
            StageJob::GenerateVariants { topic_id } => self.generate_variants(job_id, *topic_id).await,
            StageJob::ReviseDraft { draft_id, feedback } => {
                self.revise_draft(job_id, *draft_id, Some(feedback)).await
            }
            StageJob::RegenerateDraft { draft_id } => self.revise_draft(job_id, *draft_id, None).await,
            StageJob::ReviseVariant {
                variant_id,
                feedback,
            } => self.revise_variant(*variant_id, Some(feedback)).await,
            StageJob::RegenerateVariant { variant_id } => self.revise_variant(*variant_id, None).await,
        }
    }

    async fn on_exhausted(&self, job_id: Uuid, job: &StageJob, error: &StageError) {
        if let Err(e) = self.cleanup(job_id, job, error).await {
            warn!(
                job_id = %job_id,
                kind = job.kind(),
                error = %e,
                "cleanup after failed job did not complete"
            );
        }
    }
}
