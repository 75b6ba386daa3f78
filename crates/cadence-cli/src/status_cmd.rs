//! `cadence status` command: show plan progress, topics, drafts and the
//! publication schedule.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::PgPool;

use cadence_core::plan_state::PlanFailure;
use cadence_db::models::{PlanStatus, SuggestedTopic, TopicCategory, TopicStatus, VariantStatus};
use cadence_db::queries::drafts as draft_db;
use cadence_db::queries::plans as plan_db;
use cadence_db::queries::scheduled_posts as schedule_db;
use cadence_db::queries::topics::{self as topic_db, TopicFilter};

use crate::parse_id;

/// Run the status command.
///
/// When `plan_id_str` is `Some`, shows detailed status for that plan.
/// When `None`, lists all plans with a topic summary.
pub async fn run_status(pool: &PgPool, plan_id_str: Option<&str>) -> Result<()> {
    match plan_id_str {
        Some(id_str) => run_plan_status(pool, id_str).await,
        None => run_all_status(pool).await,
    }
}

/// Per category: (suggested, approved, rejected).
type TopicCounts = HashMap<TopicCategory, (usize, usize, usize)>;

fn count_topics(topics: &[SuggestedTopic]) -> TopicCounts {
    let mut counts = TopicCounts::new();
    for topic in topics {
        let entry = counts.entry(topic.category).or_default();
        match topic.status {
            TopicStatus::Suggested => entry.0 += 1,
            TopicStatus::Approved => entry.1 += 1,
            TopicStatus::Rejected => entry.2 += 1,
        }
    }
    counts
}

fn status_icon(status: VariantStatus) -> &'static str {
    match status {
        VariantStatus::PendingApproval => "?",
        VariantStatus::Approved => "+",
        VariantStatus::Rejected => "X",
        VariantStatus::NeedsRevision => "*",
    }
}

/// Show detailed status for a single plan.
async fn run_plan_status(pool: &PgPool, plan_id_str: &str) -> Result<()> {
    let plan_id = parse_id("plan", plan_id_str)?;
    let plan = plan_db::get_plan(pool, plan_id)
        .await?
        .with_context(|| format!("plan {plan_id} not found"))?;

    println!("Plan: {} ({})", plan.period_label, plan.id);
    println!("Status: {}", plan.status);
    let failure = PlanFailure::from_metadata(&plan.generation_metadata)
        .filter(|_| plan.status == PlanStatus::Error);
    if let Some(failure) = failure {
        println!(
            "Failed in {} stage: {} (resume from {})",
            failure.stage, failure.message, failure.resume_status
        );
        println!("  Re-run the trigger to retry, or `cadence reset {}`.", plan.id);
    }
    println!(
        "Updated: {}",
        plan.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    let topics = topic_db::list_topics(pool, plan_id, TopicFilter::default()).await?;
    let counts = count_topics(&topics);
    for category in [TopicCategory::Blog, TopicCategory::SocialMedia] {
        let (suggested, approved, rejected) = counts.get(&category).copied().unwrap_or_default();
        println!(
            "{category} topics: {approved} approved, {suggested} suggested, {rejected} rejected"
        );
    }

    let approved: Vec<&SuggestedTopic> = topics
        .iter()
        .filter(|t| t.status == TopicStatus::Approved)
        .collect();
    if !approved.is_empty() {
        println!();
        println!("Drafts:");
    }
    for topic in approved {
        let Some(draft) = draft_db::get_active_draft_for_topic(pool, topic.id).await? else {
            println!("  {} [{}]: no draft", topic.title, topic.category);
            continue;
        };
        println!(
            "  {} [{}]: draft {} ({}, revision {})",
            topic.title, topic.category, draft.id, draft.status, draft.revision_number
        );
        for variant in draft_db::list_variants_for_draft(pool, draft.id).await? {
            println!(
                "    [{}] {} {} v{} ({})",
                status_icon(variant.status),
                variant.id,
                variant.platform_name,
                variant.version,
                variant.status
            );
        }
    }

    let posts = schedule_db::list_scheduled_posts(pool, plan_id).await?;
    if !posts.is_empty() {
        println!();
        println!("Schedule:");
        for post in &posts {
            println!(
                "  {}  {}  {}",
                post.publication_date.format("%Y-%m-%d %H:%M UTC"),
                post.variant_id,
                post.status
            );
        }
    }

    Ok(())
}

/// List all plans with a one-line topic summary each.
async fn run_all_status(pool: &PgPool) -> Result<()> {
    let plans = plan_db::list_plans(pool).await?;

    if plans.is_empty() {
        println!("No plans found.");
        return Ok(());
    }

    for plan in &plans {
        let topics = topic_db::list_topics(pool, plan.id, TopicFilter::default()).await?;
        let counts = count_topics(&topics);
        let approved_of = |category: TopicCategory| counts.get(&category).map_or(0, |c| c.1);
        println!(
            "{}  {:<28}  {:<20}  blog {}/{}  social {}/{}",
            plan.id,
            plan.status.to_string(),
            plan.period_label,
            approved_of(TopicCategory::Blog),
            plan.blog_posts_quota,
            approved_of(TopicCategory::SocialMedia),
            plan.sm_posts_quota,
        );
    }

    Ok(())
}
