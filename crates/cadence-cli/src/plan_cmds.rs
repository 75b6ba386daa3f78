//! Operator CLI handlers for `cadence plan` subcommands.
//!
//! Implements:
//! - `cadence plan create <file>`  -- create a plan from a TOML file
//! - `cadence plan show [plan-id]` -- show plan details or list all plans

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;

use cadence_db::queries::{
    correlation_rules as rule_queries, organizations as org_queries, plans as plan_queries,
};
use cadence_db::queries::plans::NewContentPlan;

use crate::PlanCommands;
use crate::parse_id;
use crate::plan_file::parse_plan_file;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(command: PlanCommands, pool: &PgPool) -> Result<()> {
    match command {
        PlanCommands::Create { file } => cmd_create(pool, &file).await,
        PlanCommands::Show { plan_id } => match plan_id {
            Some(id) => cmd_show_one(pool, &id).await,
            None => cmd_show_all(pool).await,
        },
    }
}

// -----------------------------------------------------------------------
// cadence plan create <file>
// -----------------------------------------------------------------------

/// Read a plan TOML file, validate it, insert the organization, strategy,
/// plan, correlation rule and briefs, and print a summary.
async fn cmd_create(pool: &PgPool, file_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(file_path)
        .with_context(|| format!("failed to read plan file: {file_path}"))?;
    let file = parse_plan_file(&content)
        .with_context(|| format!("failed to parse plan file: {file_path}"))?;

    let organization = match (file.organization.id, &file.organization.name) {
        (Some(id), _) => org_queries::get_organization(pool, id)
            .await?
            .with_context(|| format!("organization {id} not found"))?,
        (None, name) => {
            let name = name.as_deref().unwrap_or_default();
            org_queries::insert_organization(
                pool,
                name,
                file.organization.industry.as_deref(),
                file.organization.description.as_deref(),
            )
            .await?
        }
    };

    if let Some(strategy) = &file.strategy {
        org_queries::insert_strategy(pool, organization.id, &strategy.to_new()).await?;
    }

    let plan = plan_queries::insert_plan(
        pool,
        &NewContentPlan {
            organization_id: organization.id,
            period_label: file.plan.period_label.clone(),
            blog_posts_quota: file.plan.blog_posts_quota,
            sm_posts_quota: file.plan.sm_posts_quota,
            correlate_posts: file.plan.correlate_posts,
            scheduling_mode: file.plan.scheduling_mode,
            scheduling_preferences: file
                .plan
                .scheduling_preferences
                .clone()
                .unwrap_or_else(|| json!({})),
        },
    )
    .await?;

    if let Some(rule) = &file.correlation {
        rule_queries::upsert_rule(pool, plan.id, &rule.to_new()).await?;
    }
    for brief in &file.briefs {
        org_queries::insert_brief(pool, plan.id, &brief.to_new()).await?;
    }

    println!("Plan created successfully.");
    println!();
    println!("  Plan ID:       {}", plan.id);
    println!("  Organization:  {} ({})", organization.name, organization.id);
    println!("  Period:        {}", plan.period_label);
    println!("  Status:        {}", plan.status);
    println!(
        "  Quotas:        {} blog / {} social",
        plan.blog_posts_quota, plan.sm_posts_quota
    );
    println!("  Scheduling:    {}", plan.scheduling_mode);
    println!("  Briefs:        {}", file.briefs.len());
    println!();
    println!("Next: run `cadence start {}` to generate blog topics.", plan.id);

    Ok(())
}

// -----------------------------------------------------------------------
// cadence plan show (list all)
// -----------------------------------------------------------------------

/// List all active plans with summary info.
async fn cmd_show_all(pool: &PgPool) -> Result<()> {
    let plans = plan_queries::list_plans(pool).await?;

    if plans.is_empty() {
        println!("No plans found. Use `cadence plan create <file>` to create one.");
        return Ok(());
    }

    let id_w = 36;
    let period_w = plans
        .iter()
        .map(|p| p.period_label.len())
        .max()
        .unwrap_or(6)
        .max(6);
    let status_w = plans
        .iter()
        .map(|p| p.status.to_string().len())
        .max()
        .unwrap_or(6)
        .max(6);

    println!(
        "{:<id_w$}  {:<period_w$}  {:<status_w$}  {:>5}  {:>6}",
        "ID", "PERIOD", "STATUS", "BLOG", "SOCIAL",
    );
    println!(
        "{:-<id_w$}  {:-<period_w$}  {:-<status_w$}  {:->5}  {:->6}",
        "", "", "", "", "",
    );
    for plan in &plans {
        println!(
            "{:<id_w$}  {:<period_w$}  {:<status_w$}  {:>5}  {:>6}",
            plan.id,
            plan.period_label,
            plan.status.to_string(),
            plan.blog_posts_quota,
            plan.sm_posts_quota,
        );
    }

    Ok(())
}

// -----------------------------------------------------------------------
// cadence plan show <plan-id>
// -----------------------------------------------------------------------

/// Show the stored configuration of one plan.
async fn cmd_show_one(pool: &PgPool, plan_id_str: &str) -> Result<()> {
    let plan_id = parse_id("plan", plan_id_str)?;
    let plan = plan_queries::get_plan(pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;
    let organization = org_queries::get_organization(pool, plan.organization_id).await?;
    let strategy = org_queries::get_active_strategy(pool, plan.organization_id).await?;
    let rule = rule_queries::get_rule_for_plan(pool, plan_id).await?;
    let briefs = org_queries::list_briefs_for_plan(pool, plan_id).await?;

    println!("Plan: {} ({})", plan.period_label, plan.id);
    if let Some(org) = &organization {
        println!("Organization: {} ({})", org.name, org.id);
    }
    println!("Status: {} (version {})", plan.status, plan.version);
    println!(
        "Quotas: {} blog, {} social (correlate: {})",
        plan.blog_posts_quota, plan.sm_posts_quota, plan.correlate_posts
    );
    println!("Scheduling: {}", plan.scheduling_mode);
    if plan
        .scheduling_preferences
        .as_object()
        .is_some_and(|m| !m.is_empty())
    {
        println!("Preferences: {}", plan.scheduling_preferences);
    }
    println!(
        "Created: {}",
        plan.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    match &strategy {
        Some(s) => {
            let platforms: Vec<String> = s
                .platforms
                .iter()
                .map(|p| format!("{} ({})", p.platform_name, p.kind))
                .collect();
            println!("Strategy: {} [{}]", s.name, platforms.join(", "));
        }
        None => println!("Strategy: (none; topic generation will fail)"),
    }

    if let Some(rule) = &rule {
        println!(
            "Correlation rule: {} per blog, {} brief-based, {} standalone",
            rule.sm_posts_per_blog, rule.brief_based_sm_posts, rule.standalone_sm_posts
        );
    }

    if !briefs.is_empty() {
        println!();
        println!("Briefs:");
        for brief in &briefs {
            println!("  - {} [{}]", brief.title, brief.analysis_status);
        }
    }

    Ok(())
}
