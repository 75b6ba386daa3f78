//! Integration tests for the `cadence` binary.
//!
//! `init` and argument handling run without a database. The plan tests run
//! `plan create`, `status` and `reset` against a throwaway PostgreSQL
//! database and are ignored by default: run with `cargo test -- --ignored`
//! when Docker is available or `CADENCE_TEST_PG_URL` points at a server.

use std::path::Path;
use std::process::{Command, Output};

use cadence_db::models::{PlanStatus, SchedulingMode};
use cadence_db::queries::{correlation_rules, organizations, plans};
use cadence_test_utils::{TestDb, pg_url};

fn cadence(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cadence"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("CADENCE_DATABASE_URL")
        .env_remove("CADENCE_GENERATOR")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run cadence binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

const PLAN_TOML: &str = r#"
[organization]
name = "Northwind Freight"
industry = "logistics"

[strategy]
goals = ["Grow inbound leads"]
tone = "Plain-spoken"

[[strategy.platforms]]
platform_name = "Blog"
kind = "blog"

[[strategy.platforms]]
platform_name = "LinkedIn"
kind = "social"

[plan]
period_label = "November 2026"
blog_posts_quota = 3
sm_posts_quota = 9
scheduling_mode = "manual"

[correlation]
sm_posts_per_blog = 2
standalone_sm_posts = 3

[[briefs]]
title = "Winter network"
key_messages = ["Two new cross-dock hubs"]
"#;

// -----------------------------------------------------------------------
// No database
// -----------------------------------------------------------------------

#[test]
fn init_writes_config_once() {
    let home = tempfile::TempDir::new().unwrap();

    let first = cadence(
        home.path(),
        &["init", "--db-url", "postgresql://db:5432/content", "--provider", "anthropic"],
    );
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let written = std::fs::read_to_string(home.path().join("cadence/config.toml")).unwrap();
    assert!(written.contains("postgresql://db:5432/content"));
    assert!(written.contains("provider = \"anthropic\""));

    let second = cadence(home.path(), &["init"]);
    assert!(!second.status.success());
    assert!(stderr(&second).contains("already exists"), "stderr: {}", stderr(&second));

    let forced = cadence(home.path(), &["init", "--force"]);
    assert!(forced.status.success(), "stderr: {}", stderr(&forced));
}

#[test]
fn init_rejects_unknown_provider() {
    let home = tempfile::TempDir::new().unwrap();
    let output = cadence(home.path(), &["init", "--provider", "telegraph"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown generator provider"));
    assert!(!home.path().join("cadence/config.toml").exists());
}

#[test]
fn help_lists_pipeline_commands() {
    let home = tempfile::TempDir::new().unwrap();
    let output = cadence(home.path(), &["--help"]);
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["start", "continue", "regenerate-topics", "regenerate-all", "reset", "topic", "draft", "variant", "status"] {
        assert!(text.contains(command), "missing {command} in:\n{text}");
    }
}

// -----------------------------------------------------------------------
// PostgreSQL
// -----------------------------------------------------------------------

async fn db_url(db: &TestDb) -> String {
    format!("{}/{}", pg_url().await, db.name)
}

fn created_plan_id(output: &str) -> uuid::Uuid {
    let line = output
        .lines()
        .find(|l| l.trim_start().starts_with("Plan ID:"))
        .unwrap_or_else(|| panic!("no plan id in output:\n{output}"));
    line.split(':').nth(1).unwrap().trim().parse().unwrap()
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn plan_create_inserts_every_table() {
    let db = TestDb::create().await;
    let url = db_url(&db).await;
    let home = tempfile::TempDir::new().unwrap();
    let file = home.path().join("plan.toml");
    std::fs::write(&file, PLAN_TOML).unwrap();

    let output = cadence(
        home.path(),
        &["--database-url", &url, "plan", "create", file.to_str().unwrap()],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let plan_id = created_plan_id(&stdout(&output));

    let plan = plans::get_plan(&db.pool, plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status, PlanStatus::New);
    assert_eq!(plan.blog_posts_quota, 3);
    assert_eq!(plan.scheduling_mode, SchedulingMode::Manual);

    let strategy = organizations::get_active_strategy(&db.pool, plan.organization_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(strategy.platforms.len(), 2);
    let rule = correlation_rules::get_rule_for_plan(&db.pool, plan_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rule.sm_posts_per_blog, 2);
    let briefs = organizations::list_briefs_for_plan(&db.pool, plan_id)
        .await
        .unwrap();
    assert_eq!(briefs.len(), 1);

    let show = cadence(home.path(), &["--database-url", &url, "plan", "show"]);
    assert!(show.status.success(), "stderr: {}", stderr(&show));
    assert!(stdout(&show).contains("November 2026"));

    db.drop().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn status_and_rejected_trigger_leave_plan_untouched() {
    let db = TestDb::create().await;
    let url = db_url(&db).await;
    let home = tempfile::TempDir::new().unwrap();
    let file = home.path().join("plan.toml");
    std::fs::write(&file, PLAN_TOML).unwrap();

    let created = cadence(
        home.path(),
        &["--database-url", &url, "plan", "create", file.to_str().unwrap()],
    );
    let plan_id = created_plan_id(&stdout(&created)).to_string();

    let status = cadence(home.path(), &["--database-url", &url, "status", &plan_id]);
    assert!(status.status.success(), "stderr: {}", stderr(&status));
    assert!(stdout(&status).contains("Status: new"));

    // Reset only applies to failed plans.
    let reset = cadence(home.path(), &["--database-url", &url, "reset", &plan_id]);
    assert!(!reset.status.success());
    assert!(
        stderr(&reset).contains("only errored plans can be reset"),
        "stderr: {}",
        stderr(&reset)
    );

    let plan = plans::get_plan(&db.pool, plan_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plan.status, PlanStatus::New);
    assert_eq!(plan.version, 0);

    let bad = cadence(home.path(), &["--database-url", &url, "start", "not-a-uuid"]);
    assert!(!bad.status.success());
    assert!(stderr(&bad).contains("invalid plan ID"));

    db.drop().await;
}
