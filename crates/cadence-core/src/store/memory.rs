//! In-memory [`ContentStore`] built from per-entity arenas.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use cadence_db::models::{
    ApprovedVariant, BriefAnalysisStatus, CommunicationStrategy, ContentBrief,
    ContentCorrelationRule, ContentDraft, ContentPlan, ContentVariant, DraftRevision, DraftStatus,
    ModelAssignment, Organization, PlanStatus, PromptTemplate, ScheduledPost,
    ScheduledPostStatus, SuggestedTopic, TopicCategory, TopicStatus, VariantStatus,
    check_parent_link,
};
use cadence_db::queries::correlation_rules::NewCorrelationRule;
use cadence_db::queries::organizations::{NewBrief, NewStrategy};
use cadence_db::queries::plans::NewContentPlan;

use super::{
    ContentStore, NewRevision, NewScheduledPost, NewTopic, TopicFilter, VariantContent,
};

/// Rows of one entity in insertion order, indexed by ID.
#[derive(Debug)]
struct Arena<T> {
    rows: Vec<T>,
    index: HashMap<Uuid, usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone> Arena<T> {
    fn insert(&mut self, id: Uuid, row: T) -> T {
        self.index.insert(id, self.rows.len());
        self.rows.push(row.clone());
        row
    }

    fn get(&self, id: Uuid) -> Option<&T> {
        self.index.get(&id).map(|&i| &self.rows[i])
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut T> {
        self.index.get(&id).map(|&i| &mut self.rows[i])
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.iter()
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.rows.iter_mut()
    }

    fn retain(&mut self, keep: impl Fn(&T) -> bool, id_of: impl Fn(&T) -> Uuid) -> u64 {
        let before = self.rows.len();
        self.rows.retain(|row| keep(row));
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (id_of(row), i))
            .collect();
        (before - self.rows.len()) as u64
    }
}

#[derive(Debug, Default)]
struct Arenas {
    organizations: Arena<Organization>,
    strategies: Arena<CommunicationStrategy>,
    briefs: Arena<ContentBrief>,
    plans: Arena<ContentPlan>,
    topics: Arena<SuggestedTopic>,
    drafts: Arena<ContentDraft>,
    variants: Arena<ContentVariant>,
    revisions: Arena<DraftRevision>,
    rules: Arena<ContentCorrelationRule>,
    scheduled: Arena<ScheduledPost>,
    templates: Arena<PromptTemplate>,
    models: Arena<ModelAssignment>,
    /// Remaining injected failures per write operation.
    faults: HashMap<&'static str, u32>,
}

impl Arenas {
    fn fault(&mut self, operation: &str) -> Result<()> {
        match self.faults.get_mut(operation) {
            Some(left) if *left > 0 => {
                *left -= 1;
                bail!("{operation} failed: connection reset")
            }
            _ => Ok(()),
        }
    }
}

/// Store keeping every entity in memory behind one async mutex.
///
/// Seeding helpers (`add_*`, `upsert_*`) stand in for the administrative
/// writes that happen outside the pipeline.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Arenas>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of the write operation named like its
    /// [`ContentStore`] method fail with a storage error.
    pub async fn fail_next(&self, operation: &'static str, times: u32) {
        self.inner.lock().await.faults.insert(operation, times);
    }

    pub async fn add_organization(&self, name: &str, industry: Option<&str>) -> Organization {
        let id = Uuid::new_v4();
        let org = Organization {
            id,
            name: name.to_string(),
            industry: industry.map(str::to_string),
            description: None,
            website_insights: None,
            created_at: Utc::now(),
        };
        self.inner.lock().await.organizations.insert(id, org)
    }

    pub async fn add_strategy(&self, organization_id: Uuid, new: NewStrategy) -> CommunicationStrategy {
        let id = Uuid::new_v4();
        let strategy = CommunicationStrategy {
            id,
            organization_id,
            name: new.name,
            goals: new.goals,
            personas: new.personas,
            tone: new.tone,
            forbidden_phrases: new.forbidden_phrases,
            preferred_phrases: new.preferred_phrases,
            cta_rules: new.cta_rules,
            platforms: Json(new.platforms),
            is_active: true,
            created_at: Utc::now(),
        };
        self.inner.lock().await.strategies.insert(id, strategy)
    }

    pub async fn add_plan(&self, new: NewContentPlan) -> ContentPlan {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let plan = ContentPlan {
            id,
            organization_id: new.organization_id,
            period_label: new.period_label,
            blog_posts_quota: new.blog_posts_quota,
            sm_posts_quota: new.sm_posts_quota,
            correlate_posts: new.correlate_posts,
            scheduling_mode: new.scheduling_mode,
            scheduling_preferences: new.scheduling_preferences,
            generation_metadata: Value::Object(Default::default()),
            status: PlanStatus::New,
            version: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().await.plans.insert(id, plan)
    }

    pub async fn add_brief(&self, plan_id: Uuid, new: NewBrief) -> ContentBrief {
        let id = Uuid::new_v4();
        let brief = ContentBrief {
            id,
            plan_id,
            title: new.title,
            analysis_status: new.analysis_status.unwrap_or(BriefAnalysisStatus::Pending),
            mandatory_topics: new.mandatory_topics,
            content_instructions: new.content_instructions,
            company_news: new.company_news,
            key_messages: new.key_messages,
            key_topics: new.key_topics,
            priority_items: new.priority_items,
            created_at: Utc::now(),
        };
        self.inner.lock().await.briefs.insert(id, brief)
    }

    pub async fn set_brief_status(&self, id: Uuid, status: BriefAnalysisStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(brief) = inner.briefs.get_mut(id) else {
            bail!("brief {id} not found");
        };
        brief.analysis_status = status;
        Ok(())
    }

    pub async fn upsert_rule(&self, plan_id: Uuid, new: NewCorrelationRule) -> ContentCorrelationRule {
        let mut inner = self.inner.lock().await;
        let existing = inner.rules.iter().find(|r| r.plan_id == plan_id).map(|r| r.id);
        let id = existing.unwrap_or_else(Uuid::new_v4);
        let rule = ContentCorrelationRule {
            id,
            plan_id,
            sm_posts_per_blog: new.sm_posts_per_blog,
            brief_based_sm_posts: new.brief_based_sm_posts,
            standalone_sm_posts: new.standalone_sm_posts,
            platform_overrides: new.platform_overrides,
            correlation_strength: new.correlation_strength,
            timing_hint: new.timing_hint,
            created_at: Utc::now(),
        };
        if let Some(slot) = inner.rules.get_mut(id) {
            *slot = rule.clone();
            return rule;
        }
        inner.rules.insert(id, rule)
    }

    pub async fn upsert_template(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
        body: &str,
    ) -> PromptTemplate {
        let mut inner = self.inner.lock().await;
        if let Some(t) = inner
            .templates
            .iter_mut()
            .find(|t| t.name == name && t.organization_id == organization_id)
        {
            t.body = body.to_string();
            return t.clone();
        }
        let id = Uuid::new_v4();
        let template = PromptTemplate {
            id,
            name: name.to_string(),
            organization_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        inner.templates.insert(id, template)
    }

    pub async fn upsert_model_assignment(
        &self,
        task_name: &str,
        organization_id: Option<Uuid>,
        model: &str,
    ) -> ModelAssignment {
        let mut inner = self.inner.lock().await;
        if let Some(m) = inner
            .models
            .iter_mut()
            .find(|m| m.task_name == task_name && m.organization_id == organization_id)
        {
            m.model = model.to_string();
            return m.clone();
        }
        let id = Uuid::new_v4();
        let assignment = ModelAssignment {
            id,
            task_name: task_name.to_string(),
            organization_id,
            model: model.to_string(),
            created_at: Utc::now(),
        };
        inner.models.insert(id, assignment)
    }

    /// Every draft of a topic, active or not, oldest first.
    pub async fn drafts_for_topic(&self, topic_id: Uuid) -> Vec<ContentDraft> {
        let inner = self.inner.lock().await;
        inner
            .drafts
            .iter()
            .filter(|d| d.topic_id == topic_id)
            .cloned()
            .collect()
    }
}

fn plan_of_topic(arenas: &Arenas, topic_id: Uuid) -> Option<Uuid> {
    arenas.topics.get(topic_id).map(|t| t.plan_id)
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        Ok(self.inner.lock().await.organizations.get(id).cloned())
    }

    async fn get_active_strategy(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<CommunicationStrategy>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .strategies
            .iter()
            .filter(|s| s.organization_id == organization_id && s.is_active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_briefs(&self, plan_id: Uuid) -> Result<Vec<ContentBrief>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .briefs
            .iter()
            .filter(|b| b.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn list_rejected_titles(&self, organization_id: Uuid, limit: i64) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut titles: Vec<String> = inner
            .topics
            .iter()
            .filter(|t| t.status == TopicStatus::Rejected)
            .filter(|t| {
                inner
                    .plans
                    .get(t.plan_id)
                    .is_some_and(|p| p.organization_id == organization_id)
            })
            .map(|t| t.title.clone())
            .collect();
        titles.reverse();
        titles.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(titles)
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<ContentPlan>> {
        Ok(self.inner.lock().await.plans.get(id).cloned())
    }

    async fn transition_plan(
        &self,
        id: Uuid,
        from: PlanStatus,
        to: PlanStatus,
        expected_version: i64,
    ) -> Result<Option<ContentPlan>> {
        let mut inner = self.inner.lock().await;
        inner.fault("transition_plan")?;
        match inner.plans.get_mut(id) {
            Some(plan) if plan.status == from && plan.version == expected_version => {
                plan.status = to;
                plan.version += 1;
                plan.updated_at = Utc::now();
                Ok(Some(plan.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn merge_plan_metadata(&self, id: Uuid, patch: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.fault("merge_plan_metadata")?;
        let Some(plan) = inner.plans.get_mut(id) else {
            bail!("plan {id} not found");
        };
        if !plan.generation_metadata.is_object() {
            plan.generation_metadata = Value::Object(Default::default());
        }
        if let (Some(target), Some(source)) =
            (plan.generation_metadata.as_object_mut(), patch.as_object())
        {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        plan.updated_at = Utc::now();
        Ok(())
    }

    async fn get_correlation_rule(&self, plan_id: Uuid) -> Result<Option<ContentCorrelationRule>> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.iter().find(|r| r.plan_id == plan_id).cloned())
    }

    async fn insert_topics(
        &self,
        plan_id: Uuid,
        new: &[NewTopic],
        job_id: Option<Uuid>,
    ) -> Result<Vec<SuggestedTopic>> {
        let mut inner = self.inner.lock().await;
        inner.fault("insert_topics")?;
        if inner.plans.get(plan_id).is_none() {
            bail!("plan {plan_id} not found");
        }

        // Validate the whole batch first so a bad link inserts nothing.
        for topic in new {
            if let Some(parent_id) = topic.parent_topic_id {
                check_parent_link(plan_id, parent_id, inner.topics.get(parent_id))
                    .map_err(|e| anyhow::anyhow!("invalid parent for topic {:?}: {e}", topic.title))?;
            }
        }

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(new.len());
        for topic in new {
            let id = Uuid::new_v4();
            let row = SuggestedTopic {
                id,
                plan_id,
                parent_topic_id: topic.parent_topic_id,
                title: topic.title.clone(),
                description: topic.description.clone(),
                category: topic.category,
                status: TopicStatus::Suggested,
                metadata: topic.metadata.clone(),
                job_id,
                is_active: true,
                created_at: now,
            };
            inserted.push(inner.topics.insert(id, row));
        }
        Ok(inserted)
    }

    async fn get_topic(&self, id: Uuid) -> Result<Option<SuggestedTopic>> {
        Ok(self.inner.lock().await.topics.get(id).cloned())
    }

    async fn list_topics(&self, plan_id: Uuid, filter: TopicFilter) -> Result<Vec<SuggestedTopic>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .topics
            .iter()
            .filter(|t| t.plan_id == plan_id && t.is_active)
            .filter(|t| filter.category.is_none_or(|c| t.category == c))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }

    async fn transition_topic(&self, id: Uuid, from: TopicStatus, to: TopicStatus) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.fault("transition_topic")?;
        match inner.topics.get_mut(id) {
            Some(topic) if topic.status == from && topic.is_active => {
                topic.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reject_suggested_topics(
        &self,
        plan_id: Uuid,
        category: Option<TopicCategory>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.fault("reject_suggested_topics")?;
        let mut n = 0;
        for topic in inner.topics.iter_mut() {
            if topic.plan_id == plan_id
                && topic.is_active
                && topic.status == TopicStatus::Suggested
                && category.is_none_or(|c| topic.category == c)
            {
                topic.status = TopicStatus::Rejected;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn deactivate_topics(&self, plan_id: Uuid, job_id: Option<Uuid>) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.fault("deactivate_topics")?;
        let mut n = 0;
        for topic in inner.topics.iter_mut() {
            if topic.plan_id == plan_id
                && topic.is_active
                && job_id.is_none_or(|job| topic.job_id == Some(job))
            {
                topic.is_active = false;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn create_draft(&self, topic_id: Uuid, job_id: Option<Uuid>) -> Result<ContentDraft> {
        let mut inner = self.inner.lock().await;
        inner.fault("create_draft")?;
        if inner.topics.get(topic_id).is_none() {
            bail!("topic {topic_id} not found");
        }

        let now = Utc::now();
        let mut revision_number = 0;
        for draft in inner.drafts.iter_mut() {
            if draft.topic_id == topic_id && draft.is_active {
                draft.is_active = false;
                draft.updated_at = now;
                revision_number = draft.revision_number + 1;
            }
        }

        let id = Uuid::new_v4();
        let draft = ContentDraft {
            id,
            topic_id,
            status: DraftStatus::Drafting,
            job_id,
            revision_number,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        Ok(inner.drafts.insert(id, draft))
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<ContentDraft>> {
        Ok(self.inner.lock().await.drafts.get(id).cloned())
    }

    async fn get_active_draft(&self, topic_id: Uuid) -> Result<Option<ContentDraft>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .drafts
            .iter()
            .find(|d| d.topic_id == topic_id && d.is_active)
            .cloned())
    }

    async fn set_draft_status(&self, id: Uuid, status: DraftStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.fault("set_draft_status")?;
        let Some(draft) = inner.drafts.get_mut(id) else {
            bail!("draft {id} not found");
        };
        draft.status = status;
        draft.updated_at = Utc::now();
        Ok(())
    }

    async fn deactivate_drafts_for_plan(&self, plan_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.fault("deactivate_drafts_for_plan")?;
        let topic_ids: Vec<Uuid> = inner
            .topics
            .iter()
            .filter(|t| t.plan_id == plan_id)
            .map(|t| t.id)
            .collect();
        let mut n = 0;
        for draft in inner.drafts.iter_mut() {
            if draft.is_active && topic_ids.contains(&draft.topic_id) {
                draft.is_active = false;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn insert_variant(
        &self,
        draft_id: Uuid,
        platform_name: &str,
        body: &VariantContent,
    ) -> Result<ContentVariant> {
        let mut inner = self.inner.lock().await;
        inner.fault("insert_variant")?;
        if inner.drafts.get(draft_id).is_none() {
            bail!("draft {draft_id} not found");
        }
        let id = Uuid::new_v4();
        let now = Utc::now();
        let variant = ContentVariant {
            id,
            draft_id,
            platform_name: platform_name.to_string(),
            content: body.content.clone(),
            headline: body.headline.clone(),
            call_to_action: body.call_to_action.clone(),
            hashtags: body.hashtags.clone(),
            status: VariantStatus::PendingApproval,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        Ok(inner.variants.insert(id, variant))
    }

    async fn delete_variants(&self, draft_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.fault("delete_variants")?;
        Ok(inner.variants.retain(|v| v.draft_id != draft_id, |v| v.id))
    }

    async fn get_variant(&self, id: Uuid) -> Result<Option<ContentVariant>> {
        Ok(self.inner.lock().await.variants.get(id).cloned())
    }

    async fn list_variants(&self, draft_id: Uuid) -> Result<Vec<ContentVariant>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .variants
            .iter()
            .filter(|v| v.draft_id == draft_id)
            .cloned()
            .collect())
    }

    async fn set_variant_status(&self, id: Uuid, status: VariantStatus) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.fault("set_variant_status")?;
        match inner.variants.get_mut(id) {
            Some(variant) => {
                variant.status = status;
                variant.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_variant_content(
        &self,
        id: Uuid,
        body: &VariantContent,
    ) -> Result<ContentVariant> {
        let mut inner = self.inner.lock().await;
        inner.fault("replace_variant_content")?;
        let Some(variant) = inner.variants.get_mut(id) else {
            bail!("variant {id} not found");
        };
        variant.content = body.content.clone();
        variant.headline = body.headline.clone();
        variant.call_to_action = body.call_to_action.clone();
        variant.hashtags = body.hashtags.clone();
        variant.status = VariantStatus::PendingApproval;
        variant.version += 1;
        variant.updated_at = Utc::now();
        Ok(variant.clone())
    }

    async fn list_approved_variants(&self, plan_id: Uuid) -> Result<Vec<ApprovedVariant>> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for variant in inner.variants.iter() {
            if variant.status != VariantStatus::Approved {
                continue;
            }
            let Some(draft) = inner.drafts.get(variant.draft_id) else {
                continue;
            };
            let Some(topic) = inner.topics.get(draft.topic_id) else {
                continue;
            };
            if !draft.is_active || !topic.is_active || plan_of_topic(&inner, topic.id) != Some(plan_id)
            {
                continue;
            }
            out.push(ApprovedVariant {
                variant_id: variant.id,
                platform_name: variant.platform_name.clone(),
                content: variant.content.clone(),
                headline: variant.headline.clone(),
                topic_id: topic.id,
                topic_title: topic.title.clone(),
                topic_category: topic.category,
            });
        }
        Ok(out)
    }

    async fn insert_revision(&self, revision: &NewRevision) -> Result<DraftRevision> {
        let mut inner = self.inner.lock().await;
        inner.fault("insert_revision")?;
        if inner.drafts.get(revision.draft_id).is_none() {
            bail!("draft {} not found", revision.draft_id);
        }
        let id = Uuid::new_v4();
        let row = DraftRevision {
            id,
            draft_id: revision.draft_id,
            variant_id: revision.variant_id,
            kind: revision.kind,
            feedback: revision.feedback.clone(),
            previous_content: revision.previous_content.clone(),
            created_at: Utc::now(),
        };
        Ok(inner.revisions.insert(id, row))
    }

    async fn list_revisions(&self, draft_id: Uuid) -> Result<Vec<DraftRevision>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .revisions
            .iter()
            .filter(|r| r.draft_id == draft_id)
            .cloned()
            .collect())
    }

    async fn replace_scheduled_posts(
        &self,
        plan_id: Uuid,
        posts: &[NewScheduledPost],
    ) -> Result<Vec<ScheduledPost>> {
        let mut inner = self.inner.lock().await;
        inner.fault("replace_scheduled_posts")?;
        for post in posts {
            if inner.variants.get(post.variant_id).is_none() {
                bail!("variant {} not found", post.variant_id);
            }
        }
        inner.scheduled.retain(|p| p.plan_id != plan_id, |p| p.id);
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(posts.len());
        for post in posts {
            let id = Uuid::new_v4();
            let row = ScheduledPost {
                id,
                plan_id,
                variant_id: post.variant_id,
                publication_date: post.publication_date,
                status: ScheduledPostStatus::Scheduled,
                reason: post.reason.clone(),
                created_at: now,
            };
            inserted.push(inner.scheduled.insert(id, row));
        }
        Ok(inserted)
    }

    async fn list_scheduled_posts(&self, plan_id: Uuid) -> Result<Vec<ScheduledPost>> {
        let inner = self.inner.lock().await;
        let mut posts: Vec<ScheduledPost> = inner
            .scheduled
            .iter()
            .filter(|p| p.plan_id == plan_id)
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.publication_date);
        Ok(posts)
    }

    async fn delete_scheduled_posts(&self, plan_id: Uuid) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.fault("delete_scheduled_posts")?;
        Ok(inner
            .scheduled
            .retain(|p| p.plan_id != plan_id, |p| p.id))
    }

    async fn get_template(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<PromptTemplate>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .templates
            .iter()
            .find(|t| t.name == name && t.organization_id == organization_id)
            .cloned())
    }

    async fn get_model_assignment(
        &self,
        task_name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<ModelAssignment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .models
            .iter()
            .find(|m| m.task_name == task_name && m.organization_id == organization_id)
            .cloned())
    }
}
