//! Database query functions for the `suggested_topics` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{SuggestedTopic, TopicCategory, TopicStatus, check_parent_link};

/// Parameters for inserting a topic. New topics always start as `suggested`.
#[derive(Debug, Clone)]
pub struct NewTopic {
    pub parent_topic_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: TopicCategory,
    pub metadata: Value,
}

/// Optional filters for [`list_topics`]. Inactive topics are never listed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicFilter {
    pub category: Option<TopicCategory>,
    pub status: Option<TopicStatus>,
}

/// Insert a batch of topics for a plan inside one transaction, tagged with
/// the stage job that generated them.
///
/// Every `parent_topic_id` is locked and validated with
/// [`check_parent_link`]; a single invalid link rolls back the whole batch.
pub async fn insert_topics(
    pool: &PgPool,
    plan_id: Uuid,
    topics: &[NewTopic],
    job_id: Option<Uuid>,
) -> Result<Vec<SuggestedTopic>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let mut inserted = Vec::with_capacity(topics.len());

    for topic in topics {
        if let Some(parent_id) = topic.parent_topic_id {
            let parent = sqlx::query_as::<_, SuggestedTopic>(
                "SELECT * FROM suggested_topics WHERE id = $1 FOR SHARE",
            )
            .bind(parent_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to look up parent topic")?;

            check_parent_link(plan_id, parent_id, parent.as_ref())
                .with_context(|| format!("invalid parent for topic {:?}", topic.title))?;
        }

        let row = sqlx::query_as::<_, SuggestedTopic>(
            "INSERT INTO suggested_topics \
             (plan_id, parent_topic_id, title, description, category, metadata, job_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING *",
        )
        .bind(plan_id)
        .bind(topic.parent_topic_id)
        .bind(&topic.title)
        .bind(&topic.description)
        .bind(topic.category)
        .bind(&topic.metadata)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert topic {:?}", topic.title))?;

        inserted.push(row);
    }

    tx.commit().await.context("failed to commit topics")?;
    Ok(inserted)
}

/// Fetch a single topic by ID.
pub async fn get_topic(pool: &PgPool, id: Uuid) -> Result<Option<SuggestedTopic>> {
    let topic = sqlx::query_as::<_, SuggestedTopic>("SELECT * FROM suggested_topics WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch topic")?;

    Ok(topic)
}

/// List active topics of a plan in creation order.
pub async fn list_topics(
    pool: &PgPool,
    plan_id: Uuid,
    filter: TopicFilter,
) -> Result<Vec<SuggestedTopic>> {
    let topics = sqlx::query_as::<_, SuggestedTopic>(
        "SELECT * FROM suggested_topics \
         WHERE plan_id = $1 AND is_active \
           AND ($2::text IS NULL OR category = $2) \
           AND ($3::text IS NULL OR status = $3) \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(plan_id)
    .bind(filter.category)
    .bind(filter.status)
    .fetch_all(pool)
    .await
    .context("failed to list topics")?;

    Ok(topics)
}

/// Change a topic's status if it is currently `from`. Returns rows affected.
pub async fn transition_topic_status(
    pool: &PgPool,
    id: Uuid,
    from: TopicStatus,
    to: TopicStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE suggested_topics SET status = $1 \
         WHERE id = $2 AND status = $3 AND is_active",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition topic status")?;

    Ok(result.rows_affected())
}

/// Mark every still-`suggested` active topic of a plan as `rejected`,
/// optionally limited to one category. Approved topics are untouched.
pub async fn reject_suggested_topics(
    pool: &PgPool,
    plan_id: Uuid,
    category: Option<TopicCategory>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE suggested_topics SET status = 'rejected' \
         WHERE plan_id = $1 AND is_active AND status = 'suggested' \
           AND ($2::text IS NULL OR category = $2)",
    )
    .bind(plan_id)
    .bind(category)
    .execute(pool)
    .await
    .context("failed to reject suggested topics")?;

    Ok(result.rows_affected())
}

/// Deactivate active topics of a plan. With `job_id`, only the topics that
/// job generated are touched (used to undo a failed stage).
pub async fn deactivate_topics(
    pool: &PgPool,
    plan_id: Uuid,
    job_id: Option<Uuid>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE suggested_topics SET is_active = FALSE \
         WHERE plan_id = $1 AND is_active \
           AND ($2::uuid IS NULL OR job_id = $2)",
    )
    .bind(plan_id)
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to deactivate topics")?;

    Ok(result.rows_affected())
}

/// Titles of every rejected topic across all plans of an organization,
/// newest first. Fed back to the generator so it avoids repeats.
pub async fn list_rejected_titles(
    pool: &PgPool,
    organization_id: Uuid,
    limit: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT t.title FROM suggested_topics t \
         JOIN content_plans p ON p.id = t.plan_id \
         WHERE p.organization_id = $1 AND t.status = 'rejected' \
         ORDER BY t.created_at DESC \
         LIMIT $2",
    )
    .bind(organization_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list rejected topic titles")?;

    Ok(rows.into_iter().map(|(title,)| title).collect())
}
