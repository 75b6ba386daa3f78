//! Persistence seam for the pipeline.
//!
//! Every read and write the core performs goes through [`ContentStore`].
//! [`PgContentStore`] delegates to the `cadence-db` query functions;
//! [`MemoryStore`] keeps arenas keyed by ID in memory for tests and dry runs.
//! Both validate `parent_topic_id` links with
//! [`cadence_db::models::check_parent_link`] before inserting topics.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use cadence_db::models::{
    ApprovedVariant, CommunicationStrategy, ContentBrief, ContentCorrelationRule, ContentDraft,
    ContentPlan, ContentVariant, DraftRevision, DraftStatus, ModelAssignment, Organization,
    PlanStatus, PromptTemplate, ScheduledPost, SuggestedTopic, TopicCategory, TopicStatus,
    VariantStatus,
};
pub use cadence_db::queries::drafts::{NewRevision, VariantContent};
pub use cadence_db::queries::scheduled_posts::NewScheduledPost;
pub use cadence_db::queries::topics::{NewTopic, TopicFilter};

pub use memory::MemoryStore;
pub use postgres::PgContentStore;

/// Storage operations used by the pipeline core.
///
/// Each method is a single write-then-read-back unit; batch inserts are
/// all-or-nothing.
#[async_trait]
pub trait ContentStore: Send + Sync {
    // -- organization context -------------------------------------------

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>>;

    /// Newest active strategy of an organization.
    async fn get_active_strategy(&self, organization_id: Uuid)
    -> Result<Option<CommunicationStrategy>>;

    async fn list_briefs(&self, plan_id: Uuid) -> Result<Vec<ContentBrief>>;

    /// Rejected topic titles across the organization, newest first.
    async fn list_rejected_titles(&self, organization_id: Uuid, limit: i64) -> Result<Vec<String>>;

    // -- plans -----------------------------------------------------------

    async fn get_plan(&self, id: Uuid) -> Result<Option<ContentPlan>>;

    /// Status transition guarded by current status and version. `None`
    /// when the guard does not match.
    async fn transition_plan(
        &self,
        id: Uuid,
        from: PlanStatus,
        to: PlanStatus,
        expected_version: i64,
    ) -> Result<Option<ContentPlan>>;

    /// Shallow-merge `patch` into the plan's generation metadata.
    async fn merge_plan_metadata(&self, id: Uuid, patch: &Value) -> Result<()>;

    async fn get_correlation_rule(&self, plan_id: Uuid) -> Result<Option<ContentCorrelationRule>>;

    // -- topics ----------------------------------------------------------

    /// Insert a batch tagged with the stage job that generated it.
    async fn insert_topics(
        &self,
        plan_id: Uuid,
        topics: &[NewTopic],
        job_id: Option<Uuid>,
    ) -> Result<Vec<SuggestedTopic>>;

    async fn get_topic(&self, id: Uuid) -> Result<Option<SuggestedTopic>>;

    async fn list_topics(&self, plan_id: Uuid, filter: TopicFilter) -> Result<Vec<SuggestedTopic>>;

    /// Returns whether the topic was in `from` and moved.
    async fn transition_topic(&self, id: Uuid, from: TopicStatus, to: TopicStatus) -> Result<bool>;

    async fn reject_suggested_topics(
        &self,
        plan_id: Uuid,
        category: Option<TopicCategory>,
    ) -> Result<u64>;

    /// Deactivate the plan's active topics, or only those `job_id` generated.
    async fn deactivate_topics(&self, plan_id: Uuid, job_id: Option<Uuid>) -> Result<u64>;

    // -- drafts, variants, revisions ------------------------------------

    /// New active draft for a topic; the previous active draft is
    /// deactivated atomically.
    async fn create_draft(&self, topic_id: Uuid, job_id: Option<Uuid>) -> Result<ContentDraft>;

    async fn get_draft(&self, id: Uuid) -> Result<Option<ContentDraft>>;

    async fn get_active_draft(&self, topic_id: Uuid) -> Result<Option<ContentDraft>>;

    async fn set_draft_status(&self, id: Uuid, status: DraftStatus) -> Result<()>;

    async fn deactivate_drafts_for_plan(&self, plan_id: Uuid) -> Result<u64>;

    async fn insert_variant(
        &self,
        draft_id: Uuid,
        platform_name: &str,
        body: &VariantContent,
    ) -> Result<ContentVariant>;

    async fn delete_variants(&self, draft_id: Uuid) -> Result<u64>;

    async fn get_variant(&self, id: Uuid) -> Result<Option<ContentVariant>>;

    async fn list_variants(&self, draft_id: Uuid) -> Result<Vec<ContentVariant>>;

    async fn set_variant_status(&self, id: Uuid, status: VariantStatus) -> Result<bool>;

    /// Replace body, bump version, reset to `pending_approval`.
    async fn replace_variant_content(&self, id: Uuid, body: &VariantContent)
    -> Result<ContentVariant>;

    async fn list_approved_variants(&self, plan_id: Uuid) -> Result<Vec<ApprovedVariant>>;

    async fn insert_revision(&self, revision: &NewRevision) -> Result<DraftRevision>;

    async fn list_revisions(&self, draft_id: Uuid) -> Result<Vec<DraftRevision>>;

    // -- scheduling ------------------------------------------------------

    /// Swap the plan's schedule for `posts`; the old one survives a failure.
    async fn replace_scheduled_posts(
        &self,
        plan_id: Uuid,
        posts: &[NewScheduledPost],
    ) -> Result<Vec<ScheduledPost>>;

    async fn list_scheduled_posts(&self, plan_id: Uuid) -> Result<Vec<ScheduledPost>>;

    async fn delete_scheduled_posts(&self, plan_id: Uuid) -> Result<u64>;

    // -- templates and model assignments (exact scope) ------------------

    async fn get_template(
        &self,
        name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<PromptTemplate>>;

    async fn get_model_assignment(
        &self,
        task_name: &str,
        organization_id: Option<Uuid>,
    ) -> Result<Option<ModelAssignment>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ContentStore) {}
};
