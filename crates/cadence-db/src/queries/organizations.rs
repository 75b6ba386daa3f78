//! Queries for organizations, their communication strategies, and the
//! briefs uploaded against a plan.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{
    BriefAnalysisStatus, CommunicationStrategy, ContentBrief, Organization, PlatformStyle,
};

/// Insert an organization.
pub async fn insert_organization(
    pool: &PgPool,
    name: &str,
    industry: Option<&str>,
    description: Option<&str>,
) -> Result<Organization> {
    let org = sqlx::query_as::<_, Organization>(
        "INSERT INTO organizations (name, industry, description) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(name)
    .bind(industry)
    .bind(description)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert organization {name:?}"))?;

    Ok(org)
}

/// Fetch an organization by ID.
pub async fn get_organization(pool: &PgPool, id: Uuid) -> Result<Option<Organization>> {
    let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch organization")?;

    Ok(org)
}

/// Store the research summary gathered for an organization's website.
pub async fn set_website_insights(pool: &PgPool, id: Uuid, insights: &Value) -> Result<()> {
    sqlx::query("UPDATE organizations SET website_insights = $1 WHERE id = $2")
        .bind(insights)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to store website insights")?;

    Ok(())
}

/// Parameters for inserting a communication strategy.
#[derive(Debug, Clone, Default)]
pub struct NewStrategy {
    pub name: String,
    pub goals: Vec<String>,
    pub personas: Vec<String>,
    pub tone: Option<String>,
    pub forbidden_phrases: Vec<String>,
    pub preferred_phrases: Vec<String>,
    pub cta_rules: Vec<String>,
    pub platforms: Vec<PlatformStyle>,
}

/// Insert a new active strategy for an organization.
pub async fn insert_strategy(
    pool: &PgPool,
    organization_id: Uuid,
    new: &NewStrategy,
) -> Result<CommunicationStrategy> {
    let strategy = sqlx::query_as::<_, CommunicationStrategy>(
        "INSERT INTO communication_strategies \
         (organization_id, name, goals, personas, tone, forbidden_phrases, \
          preferred_phrases, cta_rules, platforms) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(organization_id)
    .bind(&new.name)
    .bind(&new.goals)
    .bind(&new.personas)
    .bind(&new.tone)
    .bind(&new.forbidden_phrases)
    .bind(&new.preferred_phrases)
    .bind(&new.cta_rules)
    .bind(Json(&new.platforms))
    .fetch_one(pool)
    .await
    .context("failed to insert communication strategy")?;

    Ok(strategy)
}

/// The newest active strategy of an organization, if any.
pub async fn get_active_strategy(
    pool: &PgPool,
    organization_id: Uuid,
) -> Result<Option<CommunicationStrategy>> {
    let strategy = sqlx::query_as::<_, CommunicationStrategy>(
        "SELECT * FROM communication_strategies \
         WHERE organization_id = $1 AND is_active \
         ORDER BY created_at DESC \
         LIMIT 1",
    )
    .bind(organization_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active strategy")?;

    Ok(strategy)
}

/// Extracted brief content supplied on insert.
#[derive(Debug, Clone, Default)]
pub struct NewBrief {
    pub title: String,
    pub analysis_status: Option<BriefAnalysisStatus>,
    pub mandatory_topics: Vec<String>,
    pub content_instructions: Option<String>,
    pub company_news: Vec<String>,
    pub key_messages: Vec<String>,
    pub key_topics: Vec<String>,
    pub priority_items: Vec<String>,
}

/// Attach a brief to a plan. Defaults to `pending` analysis.
pub async fn insert_brief(pool: &PgPool, plan_id: Uuid, new: &NewBrief) -> Result<ContentBrief> {
    let brief = sqlx::query_as::<_, ContentBrief>(
        "INSERT INTO content_briefs \
         (plan_id, title, analysis_status, mandatory_topics, content_instructions, \
          company_news, key_messages, key_topics, priority_items) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(plan_id)
    .bind(&new.title)
    .bind(new.analysis_status.unwrap_or(BriefAnalysisStatus::Pending))
    .bind(&new.mandatory_topics)
    .bind(&new.content_instructions)
    .bind(&new.company_news)
    .bind(&new.key_messages)
    .bind(&new.key_topics)
    .bind(&new.priority_items)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert brief {:?}", new.title))?;

    Ok(brief)
}

/// Briefs of a plan in upload order.
pub async fn list_briefs_for_plan(pool: &PgPool, plan_id: Uuid) -> Result<Vec<ContentBrief>> {
    let briefs = sqlx::query_as::<_, ContentBrief>(
        "SELECT * FROM content_briefs WHERE plan_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list briefs")?;

    Ok(briefs)
}

/// Record the outcome of brief analysis.
pub async fn set_brief_analysis_status(
    pool: &PgPool,
    id: Uuid,
    status: BriefAnalysisStatus,
) -> Result<()> {
    sqlx::query("UPDATE content_briefs SET analysis_status = $1 WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update brief analysis status")?;

    Ok(())
}
