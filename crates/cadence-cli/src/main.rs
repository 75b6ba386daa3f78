mod config;
mod plan_cmds;
mod plan_file;
mod status_cmd;
mod trigger_cmds;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use cadence_db::pool;

use config::CadenceConfig;

#[derive(Parser)]
#[command(name = "cadence", about = "Multi-channel content production pipeline")]
struct Cli {
    /// Database URL (overrides CADENCE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a cadence config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/cadence")]
        db_url: String,
        /// Generator provider for bare model names: claude-cli or anthropic
        #[arg(long, default_value = "claude-cli")]
        provider: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the cadence database (requires config file or env vars)
    DbInit,
    /// Plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Generate blog topics for a new plan (or retry a failed topic stage)
    Start {
        /// Plan ID
        plan_id: String,
    },
    /// Run the next stage after the current approval step
    Continue {
        /// Plan ID
        plan_id: String,
    },
    /// Replace the suggested blog topics, keeping approved ones
    RegenerateTopics {
        /// Plan ID
        plan_id: String,
    },
    /// Discard all topics, drafts and schedule and start over
    RegenerateAll {
        /// Plan ID
        plan_id: String,
    },
    /// Move a failed plan back to the state before the failing stage
    Reset {
        /// Plan ID
        plan_id: String,
    },
    /// Topic approval
    Topic {
        #[command(subcommand)]
        command: TopicCommands,
    },
    /// Draft revision
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },
    /// Variant approval and revision
    Variant {
        #[command(subcommand)]
        command: VariantCommands,
    },
    /// Show plan status (omit plan_id to list all plans)
    Status {
        /// Plan ID to show status for (omit to list all plans)
        plan_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a plan from a TOML file
    Create {
        /// Path to the plan TOML file
        file: String,
    },
    /// Show plan details (or list all plans)
    Show {
        /// Plan ID to show (omit to list all)
        plan_id: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TopicCommands {
    /// Approve a suggested topic and generate its variants
    Approve {
        /// Topic ID
        topic_id: String,
    },
    /// Reject a suggested topic
    Reject {
        /// Topic ID
        topic_id: String,
    },
}

#[derive(Subcommand)]
pub enum DraftCommands {
    /// Produce a new version of a draft guided by feedback
    Revise {
        /// Draft ID
        draft_id: String,
        /// What the new version should change
        #[arg(long)]
        feedback: String,
    },
    /// Reject a draft and generate a fresh one for the same topic
    Regenerate {
        /// Draft ID
        draft_id: String,
        /// Why the draft was rejected (kept in the revision history)
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum VariantCommands {
    /// Approve a variant
    Approve {
        /// Variant ID
        variant_id: String,
    },
    /// Reject a variant
    Reject {
        /// Variant ID
        variant_id: String,
    },
    /// Rewrite a variant guided by feedback
    Revise {
        /// Variant ID
        variant_id: String,
        /// What the new version should change
        #[arg(long)]
        feedback: String,
    },
    /// Rewrite a variant from scratch
    Regenerate {
        /// Variant ID
        variant_id: String,
    },
}

/// Parse a UUID argument, naming the entity in the error.
pub fn parse_id(entity: &str, raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid {entity} ID: {raw}"))
}

/// Execute the `cadence init` command: write config file.
fn cmd_init(db_url: &str, provider: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if !config::PROVIDERS.contains(&provider) {
        anyhow::bail!(
            "unknown generator provider {provider:?} (expected one of: {})",
            config::PROVIDERS.join(", ")
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        generator: config::GeneratorSection {
            provider: provider.to_string(),
            ..config::GeneratorSection::default()
        },
        pipeline: cadence_core::PipelineConfig::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  generator.provider = {provider}");
    println!("  pipeline.default_model = {}", cfg.pipeline.default_model);
    println!();
    println!("Next: run `cadence db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `cadence db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CadenceConfig::resolve(cli_db_url)?;

    println!("Initializing cadence database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("cadence db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            provider,
            force,
        } => {
            cmd_init(&db_url, &provider, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Plan { command } => {
            let resolved = CadenceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::run_plan_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { plan_id } => {
            let resolved = CadenceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, plan_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        command => {
            let resolved = CadenceConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = trigger_cmds::run_trigger_command(command, &db_pool, &resolved).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that read or write process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
