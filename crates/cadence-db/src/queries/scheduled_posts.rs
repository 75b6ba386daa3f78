//! Queries for `scheduled_posts`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ScheduledPost;

/// One publication slot to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScheduledPost {
    pub variant_id: Uuid,
    pub publication_date: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Replace a plan's publication slots with `posts` in one transaction.
/// On error the previous schedule is left as it was.
pub async fn replace_scheduled_posts(
    pool: &PgPool,
    plan_id: Uuid,
    posts: &[NewScheduledPost],
) -> Result<Vec<ScheduledPost>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    sqlx::query("DELETE FROM scheduled_posts WHERE plan_id = $1")
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .context("failed to clear previous schedule")?;

    let mut inserted = Vec::with_capacity(posts.len());

    for post in posts {
        let row = sqlx::query_as::<_, ScheduledPost>(
            "INSERT INTO scheduled_posts (plan_id, variant_id, publication_date, reason) \
             VALUES ($1, $2, $3, $4) \
             RETURNING *",
        )
        .bind(plan_id)
        .bind(post.variant_id)
        .bind(post.publication_date)
        .bind(&post.reason)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to schedule variant {}", post.variant_id))?;

        inserted.push(row);
    }

    tx.commit().await.context("failed to commit scheduled posts")?;
    Ok(inserted)
}

/// Scheduled posts of a plan ordered by publication date.
pub async fn list_scheduled_posts(pool: &PgPool, plan_id: Uuid) -> Result<Vec<ScheduledPost>> {
    let posts = sqlx::query_as::<_, ScheduledPost>(
        "SELECT * FROM scheduled_posts WHERE plan_id = $1 ORDER BY publication_date ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list scheduled posts")?;

    Ok(posts)
}

/// Remove every scheduled post of a plan. Used when a plan is regenerated.
pub async fn delete_scheduled_posts(pool: &PgPool, plan_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM scheduled_posts WHERE plan_id = $1")
        .bind(plan_id)
        .execute(pool)
        .await
        .context("failed to delete scheduled posts")?;

    Ok(result.rows_affected())
}
