//! Queries for `content_correlation_rules`. A plan has at most one rule.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ContentCorrelationRule;

/// Parameters for creating or replacing a plan's correlation rule.
#[derive(Debug, Clone)]
pub struct NewCorrelationRule {
    pub sm_posts_per_blog: i32,
    pub brief_based_sm_posts: i32,
    pub standalone_sm_posts: i32,
    pub platform_overrides: Value,
    pub correlation_strength: Option<String>,
    pub timing_hint: Option<String>,
}

/// Fetch the correlation rule of a plan.
pub async fn get_rule_for_plan(
    pool: &PgPool,
    plan_id: Uuid,
) -> Result<Option<ContentCorrelationRule>> {
    let rule = sqlx::query_as::<_, ContentCorrelationRule>(
        "SELECT * FROM content_correlation_rules WHERE plan_id = $1",
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch correlation rule")?;

    Ok(rule)
}

/// Create the plan's rule, or overwrite the existing one.
pub async fn upsert_rule(
    pool: &PgPool,
    plan_id: Uuid,
    new: &NewCorrelationRule,
) -> Result<ContentCorrelationRule> {
    let rule = sqlx::query_as::<_, ContentCorrelationRule>(
        "INSERT INTO content_correlation_rules \
         (plan_id, sm_posts_per_blog, brief_based_sm_posts, standalone_sm_posts, \
          platform_overrides, correlation_strength, timing_hint) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (plan_id) DO UPDATE SET \
           sm_posts_per_blog = EXCLUDED.sm_posts_per_blog, \
           brief_based_sm_posts = EXCLUDED.brief_based_sm_posts, \
           standalone_sm_posts = EXCLUDED.standalone_sm_posts, \
           platform_overrides = EXCLUDED.platform_overrides, \
           correlation_strength = EXCLUDED.correlation_strength, \
           timing_hint = EXCLUDED.timing_hint \
         RETURNING *",
    )
    .bind(plan_id)
    .bind(new.sm_posts_per_blog)
    .bind(new.brief_based_sm_posts)
    .bind(new.standalone_sm_posts)
    .bind(&new.platform_overrides)
    .bind(&new.correlation_strength)
    .bind(&new.timing_hint)
    .fetch_one(pool)
    .await
    .context("failed to upsert correlation rule")?;

    Ok(rule)
}
