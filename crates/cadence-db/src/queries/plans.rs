//! Database query functions for the `content_plans` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ContentPlan, PlanStatus, SchedulingMode};

/// Parameters for inserting a new plan.
#[derive(Debug, Clone)]
pub struct NewContentPlan {
    pub organization_id: Uuid,
    pub period_label: String,
    pub blog_posts_quota: i32,
    pub sm_posts_quota: i32,
    pub correlate_posts: bool,
    pub scheduling_mode: SchedulingMode,
    pub scheduling_preferences: Value,
}

/// Insert a new plan row in status `new`, version 0.
pub async fn insert_plan(pool: &PgPool, new: &NewContentPlan) -> Result<ContentPlan> {
    let plan = sqlx::query_as::<_, ContentPlan>(
        "INSERT INTO content_plans \
         (organization_id, period_label, blog_posts_quota, sm_posts_quota, \
          correlate_posts, scheduling_mode, scheduling_preferences) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.organization_id)
    .bind(&new.period_label)
    .bind(new.blog_posts_quota)
    .bind(new.sm_posts_quota)
    .bind(new.correlate_posts)
    .bind(new.scheduling_mode)
    .bind(&new.scheduling_preferences)
    .fetch_one(pool)
    .await
    .context("failed to insert content plan")?;

    Ok(plan)
}

/// Fetch a plan by ID (soft-deleted plans included).
pub async fn get_plan(pool: &PgPool, id: Uuid) -> Result<Option<ContentPlan>> {
    let plan = sqlx::query_as::<_, ContentPlan>("SELECT * FROM content_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch content plan")?;

    Ok(plan)
}

/// List active plans, newest first.
pub async fn list_plans(pool: &PgPool) -> Result<Vec<ContentPlan>> {
    let plans = sqlx::query_as::<_, ContentPlan>(
        "SELECT * FROM content_plans WHERE is_active ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list content plans")?;

    Ok(plans)
}

/// Move a plan from `from` to `to`, guarded by status and version.
///
/// The row only changes when both the current status and the version match;
/// the version is incremented on success. Returns `None` when the guard did
/// not match (wrong status, concurrent writer, or missing plan).
pub async fn transition_plan_status(
    pool: &PgPool,
    id: Uuid,
    from: PlanStatus,
    to: PlanStatus,
    expected_version: i64,
) -> Result<Option<ContentPlan>> {
    let plan = sqlx::query_as::<_, ContentPlan>(
        "UPDATE content_plans \
         SET status = $1, version = version + 1, updated_at = now() \
         WHERE id = $2 AND status = $3 AND version = $4 \
         RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .bind(expected_version)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to transition plan {id} from {from} to {to}"))?;

    Ok(plan)
}

/// Shallow-merge `patch` into the plan's `generation_metadata` object.
pub async fn merge_generation_metadata(pool: &PgPool, id: Uuid, patch: &Value) -> Result<()> {
    let result = sqlx::query(
        "UPDATE content_plans \
         SET generation_metadata = generation_metadata || $1::jsonb, updated_at = now() \
         WHERE id = $2",
    )
    .bind(patch)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update generation metadata")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("plan {id} not found");
    }

    Ok(())
}

/// Soft-delete a plan. Hard deletion is an administrative operation.
pub async fn deactivate_plan(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE content_plans SET is_active = FALSE, updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to deactivate content plan")?;

    Ok(())
}
