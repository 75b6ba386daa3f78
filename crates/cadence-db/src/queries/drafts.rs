//! Database query functions for `content_drafts`, `content_variants` and
//! `draft_revisions`.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    ApprovedVariant, ContentDraft, ContentVariant, DraftRevision, DraftStatus, RevisionKind,
    VariantStatus,
};

// -----------------------------------------------------------------------
// Drafts
// -----------------------------------------------------------------------

/// Create the new active draft for a topic.
///
/// Any previously active draft of the topic is deactivated in the same
/// transaction, so exactly one active draft exists afterwards. Old drafts
/// are kept for history.
pub async fn insert_draft(
    pool: &PgPool,
    topic_id: Uuid,
    job_id: Option<Uuid>,
) -> Result<ContentDraft> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let previous: Option<(i32,)> = sqlx::query_as(
        "UPDATE content_drafts SET is_active = FALSE, updated_at = now() \
         WHERE topic_id = $1 AND is_active \
         RETURNING revision_number",
    )
    .bind(topic_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to deactivate previous draft")?;

    let revision_number = previous.map(|(n,)| n + 1).unwrap_or(0);

    let draft = sqlx::query_as::<_, ContentDraft>(
        "INSERT INTO content_drafts (topic_id, job_id, revision_number) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(topic_id)
    .bind(job_id)
    .bind(revision_number)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert draft")?;

    tx.commit().await.context("failed to commit draft")?;
    Ok(draft)
}

/// Fetch a draft by ID.
pub async fn get_draft(pool: &PgPool, id: Uuid) -> Result<Option<ContentDraft>> {
    let draft = sqlx::query_as::<_, ContentDraft>("SELECT * FROM content_drafts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch draft")?;

    Ok(draft)
}

/// Fetch the active draft of a topic, if any.
pub async fn get_active_draft_for_topic(
    pool: &PgPool,
    topic_id: Uuid,
) -> Result<Option<ContentDraft>> {
    let draft = sqlx::query_as::<_, ContentDraft>(
        "SELECT * FROM content_drafts WHERE topic_id = $1 AND is_active",
    )
    .bind(topic_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active draft")?;

    Ok(draft)
}

/// Set a draft's status. Errors if the draft does not exist.
pub async fn update_draft_status(pool: &PgPool, id: Uuid, status: DraftStatus) -> Result<()> {
    let result =
        sqlx::query("UPDATE content_drafts SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update draft status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("draft {id} not found");
    }

    Ok(())
}

/// Deactivate every active draft belonging to a plan's topics.
pub async fn deactivate_drafts_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE content_drafts d SET is_active = FALSE, updated_at = now() \
         FROM suggested_topics t \
         WHERE d.topic_id = t.id AND t.plan_id = $1 AND d.is_active",
    )
    .bind(plan_id)
    .execute(pool)
    .await
    .context("failed to deactivate drafts")?;

    Ok(result.rows_affected())
}

// -----------------------------------------------------------------------
// Variants
// -----------------------------------------------------------------------

/// Generated body of one platform variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantContent {
    pub content: String,
    pub headline: Option<String>,
    pub call_to_action: Option<String>,
    pub hashtags: Vec<String>,
}

/// Insert a variant in `pending_approval`, version 1.
pub async fn insert_variant(
    pool: &PgPool,
    draft_id: Uuid,
    platform_name: &str,
    body: &VariantContent,
) -> Result<ContentVariant> {
    let variant = sqlx::query_as::<_, ContentVariant>(
        "INSERT INTO content_variants \
         (draft_id, platform_name, content, headline, call_to_action, hashtags) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(draft_id)
    .bind(platform_name)
    .bind(&body.content)
    .bind(&body.headline)
    .bind(&body.call_to_action)
    .bind(&body.hashtags)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert {platform_name} variant"))?;

    Ok(variant)
}

/// Fetch a variant by ID.
pub async fn get_variant(pool: &PgPool, id: Uuid) -> Result<Option<ContentVariant>> {
    let variant =
        sqlx::query_as::<_, ContentVariant>("SELECT * FROM content_variants WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch variant")?;

    Ok(variant)
}

/// List the variants of a draft in creation order.
pub async fn list_variants_for_draft(pool: &PgPool, draft_id: Uuid) -> Result<Vec<ContentVariant>> {
    let variants = sqlx::query_as::<_, ContentVariant>(
        "SELECT * FROM content_variants WHERE draft_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(draft_id)
    .fetch_all(pool)
    .await
    .context("failed to list variants")?;

    Ok(variants)
}

/// Delete every variant of a draft. Returns rows affected.
pub async fn delete_variants_for_draft(pool: &PgPool, draft_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM content_variants WHERE draft_id = $1")
        .bind(draft_id)
        .execute(pool)
        .await
        .context("failed to delete variants")?;

    Ok(result.rows_affected())
}

/// Set a variant's status. Returns rows affected.
pub async fn update_variant_status(
    pool: &PgPool,
    id: Uuid,
    status: VariantStatus,
) -> Result<u64> {
    let result =
        sqlx::query("UPDATE content_variants SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await
            .context("failed to update variant status")?;

    Ok(result.rows_affected())
}

/// Replace a variant's body, bump its version and return it to
/// `pending_approval`.
pub async fn replace_variant_content(
    pool: &PgPool,
    id: Uuid,
    body: &VariantContent,
) -> Result<ContentVariant> {
    let variant = sqlx::query_as::<_, ContentVariant>(
        "UPDATE content_variants \
         SET content = $1, headline = $2, call_to_action = $3, hashtags = $4, \
             status = 'pending_approval', version = version + 1, updated_at = now() \
         WHERE id = $5 \
         RETURNING *",
    )
    .bind(&body.content)
    .bind(&body.headline)
    .bind(&body.call_to_action)
    .bind(&body.hashtags)
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to replace variant content")?;

    variant.with_context(|| format!("variant {id} not found"))
}

/// Approved variants of a plan's active drafts, joined with topic data.
pub async fn list_approved_variants(pool: &PgPool, plan_id: Uuid) -> Result<Vec<ApprovedVariant>> {
    let rows = sqlx::query_as::<_, ApprovedVariant>(
        "SELECT v.id AS variant_id, v.platform_name, v.content, v.headline, \
                t.id AS topic_id, t.title AS topic_title, t.category AS topic_category \
         FROM content_variants v \
         JOIN content_drafts d ON d.id = v.draft_id \
         JOIN suggested_topics t ON t.id = d.topic_id \
         WHERE t.plan_id = $1 AND t.is_active AND d.is_active AND v.status = 'approved' \
         ORDER BY t.created_at ASC, v.created_at ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list approved variants")?;

    Ok(rows)
}

// -----------------------------------------------------------------------
// Revisions
// -----------------------------------------------------------------------

/// Parameters for appending a revision record.
#[derive(Debug, Clone)]
pub struct NewRevision {
    pub draft_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub kind: RevisionKind,
    pub feedback: Option<String>,
    pub previous_content: Value,
}

/// Append a revision record. Revisions are never updated.
pub async fn insert_revision(pool: &PgPool, new: &NewRevision) -> Result<DraftRevision> {
    let revision = sqlx::query_as::<_, DraftRevision>(
        "INSERT INTO draft_revisions (draft_id, variant_id, kind, feedback, previous_content) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(new.draft_id)
    .bind(new.variant_id)
    .bind(new.kind)
    .bind(&new.feedback)
    .bind(&new.previous_content)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert {} revision", new.kind))?;

    Ok(revision)
}

/// Revisions of a draft, oldest first.
pub async fn list_revisions_for_draft(pool: &PgPool, draft_id: Uuid) -> Result<Vec<DraftRevision>> {
    let revisions = sqlx::query_as::<_, DraftRevision>(
        "SELECT * FROM draft_revisions WHERE draft_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(draft_id)
    .fetch_all(pool)
    .await
    .context("failed to list revisions")?;

    Ok(revisions)
}
