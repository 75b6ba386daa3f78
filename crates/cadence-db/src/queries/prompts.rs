//! Queries for prompt templates and per-task model assignments.
//!
//! Both tables are scoped: a row with `organization_id = NULL` is the
//! global default, a row with an organization is that organization's
//! override. Lookups here match one scope exactly; precedence between
//! scopes is resolved by the caller.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ModelAssignment, PromptTemplate};

/// Fetch the template `name` at exactly the given scope.
pub async fn get_template(
    pool: &PgPool,
    name: &str,
    organization_id: Option<Uuid>,
) -> Result<Option<PromptTemplate>> {
    let template = sqlx::query_as::<_, PromptTemplate>(
        "SELECT * FROM prompt_templates \
         WHERE name = $1 AND organization_id IS NOT DISTINCT FROM $2",
    )
    .bind(name)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch prompt template {name:?}"))?;

    Ok(template)
}

/// Create or replace the template `name` at the given scope.
pub async fn upsert_template(
    pool: &PgPool,
    name: &str,
    organization_id: Option<Uuid>,
    body: &str,
) -> Result<PromptTemplate> {
    let template = sqlx::query_as::<_, PromptTemplate>(
        "INSERT INTO prompt_templates (name, organization_id, body) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (name, COALESCE(organization_id, '00000000-0000-0000-0000-000000000000')) \
         DO UPDATE SET body = EXCLUDED.body \
         RETURNING *",
    )
    .bind(name)
    .bind(organization_id)
    .bind(body)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert prompt template {name:?}"))?;

    Ok(template)
}

/// Fetch the model assigned to `task_name` at exactly the given scope.
pub async fn get_model_assignment(
    pool: &PgPool,
    task_name: &str,
    organization_id: Option<Uuid>,
) -> Result<Option<ModelAssignment>> {
    let assignment = sqlx::query_as::<_, ModelAssignment>(
        "SELECT * FROM model_assignments \
         WHERE task_name = $1 AND organization_id IS NOT DISTINCT FROM $2",
    )
    .bind(task_name)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to fetch model assignment for {task_name:?}"))?;

    Ok(assignment)
}

/// Create or replace the model assignment for `task_name` at the given scope.
pub async fn upsert_model_assignment(
    pool: &PgPool,
    task_name: &str,
    organization_id: Option<Uuid>,
    model: &str,
) -> Result<ModelAssignment> {
    let assignment = sqlx::query_as::<_, ModelAssignment>(
        "INSERT INTO model_assignments (task_name, organization_id, model) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (task_name, COALESCE(organization_id, '00000000-0000-0000-0000-000000000000')) \
         DO UPDATE SET model = EXCLUDED.model \
         RETURNING *",
    )
    .bind(task_name)
    .bind(organization_id)
    .bind(model)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert model assignment for {task_name:?}"))?;

    Ok(assignment)
}
