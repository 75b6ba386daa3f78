//! [`ContentStore`] over PostgreSQL.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use cadence_db::models::{
    ApprovedVariant, CommunicationStrategy, ContentBrief, ContentCorrelationRule, ContentDraft,
    ContentPlan, ContentVariant, DraftRevision, DraftStatus, ModelAssignment, Organization,
    PlanStatus, PromptTemplate, ScheduledPost, SuggestedTopic, TopicCategory, TopicStatus,
    VariantStatus,
};
use cadence_db::queries::{
    correlation_rules, drafts, organizations, plans, prompts, scheduled_posts, topics,
};

use super::{
    ContentStore, NewRevision, NewScheduledPost, NewTopic, TopicFilter, VariantContent,
};

/// Store backed by a connection pool.
#[derive(Debug, Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>> {
        organizations::get_organization(&self.pool, id).await
    }

    async fn get_active_strategy(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<CommunicationStrategy>> {
        organizations::get_active_strategy(&self.pool, organization_id).await
    }

    async fn list_briefs(&self, plan_id: Uuid) -> Result<Vec<ContentBrief>> {
        organizations::list_briefs_for_plan(&self.pool, plan_id).await
    }

    async fn list_rejected_titles(&self, organization_id: Uuid, limit: i64) -> Result<Vec<String>> {
        topics::list_rejected_titles(&self.pool, organization_id, limit).await
    }

    async fn get_plan(&self, id: Uuid) -> Result<Option<ContentPlan>> {
        plans::get_plan(&self.pool, id).await
    }

    async fn transition_plan(
        &self,
        id: Uuid,
        from: PlanStatus,
        to: PlanStatus,
        expected_version: i64,
    ) -> Result<Option<ContentPlan>> {
        plans::transition_plan_status(&self.pool, id, from, to, expected_version).await
    }

    async fn merge_plan_metadata(&self, id: Uuid, patch: &Value) -> Result<()> {
        plans::merge_generation_metadata(&self.pool, id, patch).await
    }

    async fn get_correlation_rule(&self, plan_id: Uuid) -> Result<Option<ContentCorrelationRule>> {
        correlation_rules::get_rule_for_plan(&self.pool, plan_id).await
    }

    async fn insert_topics(
        &self,
        plan_id: Uuid,
        new: &[NewTopic],
        job_id: Option<Uuid>,
    ) -> Result<Vec<SuggestedTopic>> {
        topics::insert_topics(&self.pool, plan_id, new, job_id).await
    }

    async fn get_topic(&self, id: Uuid) -> Result<Option<SuggestedTopic>> {
        topics::get_topic(&self.pool, id).await
    }

    async fn list_topics(&self, plan_id: Uuid, filter: TopicFilter) -> Result<Vec<SuggestedTopic>> {
        topics::list_topics(&self.pool, plan_id, filter).await
    }

    async fn transition_topic(&self, id: Uuid, from: TopicStatus, to: TopicStatus) -> Result<bool> {
        Ok(topics::transition_topic_status(&self.pool, id, from, to).await? == 1)
    }

    async fn reject_suggested_topics(
        &self,
        plan_id: Uuid,
        category: Option<TopicCategory>,
    ) -> Result<u64> {
        topics::reject_suggested_topics(&self.pool, plan_id, category).await
    }

    async fn deactivate_topics(&self, plan_id: Uuid, job_id: Option<Uuid>) -> Result<u64> {
        topics::deactivate_topics(&self.pool, plan_id, job_id).await
    }

    async fn create_draft(&self, topic_id: Uuid, job_id: Option<Uuid>) -> Result<ContentDraft> {
        drafts::insert_draft(&self.pool, topic_id, job_id).await
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<ContentDraft>> {
        drafts::get_draft(&self.pool, id).await
    }

    async fn get_active_draft(&self, topic_id: Uuid) -> Result<Option<ContentDraft>> {
        drafts::get_active_draft_for_topic(&self.pool, topic_id).await
    }

    async fn set_draft_status(&self, id: Uuid, status: DraftStatus) -> Result<()> {
        drafts::update_draft_status(&self.pool, id, status).await
    }

    async fn deactivate_drafts_for_plan(&self, plan_id: Uuid) -> Result<u64> {
        drafts::deactivate_drafts_for_plan(&self.pool, plan_id).await
    }

    async fn insert_variant(
        &self,
        draft_id: Uuid,
        platform_name: &str,
        body: &VariantContent,
    ) -> Result<ContentVariant> {
        drafts::insert_variant(&self.pool, draft_id, platform_name, body).await
    }

    async fn delete_variants(&self, draft_id: Uuid) -> Result<u64> {
        drafts::delete_variants_for_draft(&self.pool, draft_id).await
    }

    async fn get_variant(&self, id: Uuid) -> Result<Option<ContentVariant>> {
        drafts::get_variant(&self.pool, id).await
    }

    async fn list_variants(&self, draft_id: Uuid) -> Result<Vec<ContentVariant>> {
        drafts::list_variants_for_draft(&self.pool, draft_id).await
    }

    async fn set_variant_status(&self, id: Uuid, status: VariantStatus) -> Result<bool> {
        Ok(drafts::update_variant_status(&self.pool, id, status).await? == 1)
    }

    async fn replace_variant_content(
        &self,
        id: Uuid,
        body: &VariantContent,
    ) -> Result<ContentVariant> {
        drafts::replace_variant_content(&self.pool, id, body).await
    }

    async fn list_approved_variants(&self, plan_id: Uuid) -> Result<Vec<ApprovedVariant>> {
        drafts::list_approved_variants(&self.pool, plan_id).await
    }

    async fn insert_revision(&self, revision: &NewRevision) -> Result<DraftRevision> {
        drafts::insert_revision(&self.pool, revision).await
    }

    async fn list_revisions(&self, draft_id: Uuid) -> Result<Vec<DraftRevision>> {
        drafts::list_revisions_for_draft(&self.pool, draft_id).await
    }

    async fn replace_scheduled_posts(
        &self,
        plan_id: Uuid,
        posts: &[NewScheduledPost],
    ) -> Result<Vec<ScheduledPost>> {
        scheduled_posts::replace_scheduled_posts(&self.pool, plan_id, posts).await
    }

    async fn list_scheduled_posts(&self, plan_id: Uuid) -> Result<Vec<ScheduledPost>> {
        scheduled_posts::list_scheduled_posts(&self.pool, plan_id).await
    }

    async fn delete_scheduled_posts(&self, plan_id: Uuid) -> Result<u64> {
        scheduled_posts::delete_scheduled_posts(&self.pool, plan_id).await
    }

    async fn get_template(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<PromptTemplate>> {
        prompts::get_template(&self.pool, name, organization_id).await
    }

    async fn get_model_assignment(
        &self,
        task_name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<ModelAssignment>> {
        prompts::get_model_assignment(&self.pool, task_name, organization_id).await
    }
}
