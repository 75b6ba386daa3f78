//! Pipeline triggers and approval commands.
//!
//! Each command starts an in-process [`Pipeline`] over the database, runs
//! one trigger, waits for the dispatched job and prints its outcome.

use std::sync::Arc;

use anyhow::{Result, bail};
use sqlx::PgPool;
use uuid::Uuid;

use cadence_core::jobs::{JobHandle, JobOutcome};
use cadence_core::pipeline::Pipeline;
use cadence_core::store::PgContentStore;
use cadence_db::models::ContentVariant;

use crate::config::CadenceConfig;
use crate::{Commands, DraftCommands, TopicCommands, VariantCommands, parse_id};

/// Start a pipeline over `db_pool`, run `command`, then drain the workers.
pub async fn run_trigger_command(
    command: Commands,
    db_pool: &PgPool,
    resolved: &CadenceConfig,
) -> Result<()> {
    let store = Arc::new(PgContentStore::new(db_pool.clone()));
    let generator = resolved.generator.build()?;
    let pipeline = Pipeline::new(store, generator, &resolved.pipeline);

    let result = dispatch(&pipeline, command).await;
    pipeline.shutdown().await;
    result
}

async fn dispatch(pipeline: &Pipeline, command: Commands) -> Result<()> {
    match command {
        Commands::Start { plan_id } => {
            let id = parse_id("plan", &plan_id)?;
            wait(pipeline.start_generation(id).await?).await
        }
        Commands::Continue { plan_id } => {
            let id = parse_id("plan", &plan_id)?;
            wait(pipeline.continue_after_approval(id).await?).await
        }
        Commands::RegenerateTopics { plan_id } => {
            let id = parse_id("plan", &plan_id)?;
            wait(pipeline.regenerate_topics(id).await?).await
        }
        Commands::RegenerateAll { plan_id } => {
            let id = parse_id("plan", &plan_id)?;
            wait(pipeline.regenerate_all(id).await?).await
        }
        Commands::Reset { plan_id } => {
            let id = parse_id("plan", &plan_id)?;
            let plan = pipeline.reset(id).await?;
            println!("Plan {} reset to {}.", plan.id, plan.status);
            Ok(())
        }
        Commands::Topic { command } => run_topic_command(pipeline, command).await,
        Commands::Draft { command } => run_draft_command(pipeline, command).await,
        Commands::Variant { command } => run_variant_command(pipeline, command).await,
        _ => bail!("not a pipeline command"),
    }
}

async fn run_topic_command(pipeline: &Pipeline, command: TopicCommands) -> Result<()> {
    match command {
        TopicCommands::Approve { topic_id } => {
            let id = parse_id("topic", &topic_id)?;
            let handle = pipeline.approve_topic(id).await?;
            println!("Topic {id} approved; generating variants.");
            wait(handle).await
        }
        TopicCommands::Reject { topic_id } => {
            let id = parse_id("topic", &topic_id)?;
            pipeline.reject_topic(id).await?;
            println!("Topic {id} rejected.");
            Ok(())
        }
    }
}

async fn run_draft_command(pipeline: &Pipeline, command: DraftCommands) -> Result<()> {
    match command {
        DraftCommands::Revise { draft_id, feedback } => {
            let id = parse_id("draft", &draft_id)?;
            wait(pipeline.request_draft_revision(id, &feedback).await?).await
        }
        DraftCommands::Regenerate { draft_id, reason } => {
            let id = parse_id("draft", &draft_id)?;
            wait(pipeline.regenerate_draft(id, reason.as_deref()).await?).await
        }
    }
}

async fn run_variant_command(pipeline: &Pipeline, command: VariantCommands) -> Result<()> {
    match command {
        VariantCommands::Approve { variant_id } => {
            let id = parse_id("variant", &variant_id)?;
            print_variant("approved", &pipeline.approve_variant(id).await?);
            Ok(())
        }
        VariantCommands::Reject { variant_id } => {
            let id = parse_id("variant", &variant_id)?;
            print_variant("rejected", &pipeline.reject_variant(id).await?);
            Ok(())
        }
        VariantCommands::Revise {
            variant_id,
            feedback,
        } => {
            let id = parse_id("variant", &variant_id)?;
            wait(pipeline.request_variant_revision(id, &feedback).await?).await
        }
        VariantCommands::Regenerate { variant_id } => {
            let id = parse_id("variant", &variant_id)?;
            wait(pipeline.regenerate_variant(id).await?).await
        }
    }
}

fn print_variant(action: &str, variant: &ContentVariant) {
    println!(
        "Variant {} ({}, v{}) {action}; now {}.",
        variant.id, variant.platform_name, variant.version, variant.status
    );
}

/// Block on a job, printing its outcome. A failed or cancelled job is an
/// error so the process exits non-zero.
async fn wait(handle: JobHandle) -> Result<()> {
    let job_id: Uuid = handle.id;
    let kind = handle.kind;
    println!("Job {job_id} ({kind}) dispatched, waiting...");

    let outcome = tokio::select! {
        outcome = handle.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; letting the running stage finish before exiting.");
            bail!("job {job_id} ({kind}) interrupted");
        }
    };

    match outcome {
        JobOutcome::Succeeded { attempts, detail } => {
            println!("Job {job_id} ({kind}) succeeded after {attempts} attempt(s).");
            println!("{}", serde_json::to_string_pretty(&detail)?);
            Ok(())
        }
        JobOutcome::Failed { attempts, error } => {
            bail!("job {job_id} ({kind}) failed after {attempts} attempt(s): {error}")
        }
        JobOutcome::Cancelled => bail!("job {job_id} ({kind}) was cancelled"),
    }
}
