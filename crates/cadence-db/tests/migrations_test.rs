//! Migration smoke tests against a real PostgreSQL.
//!
//! Ignored by default: run with `cargo test -- --ignored` when Docker is
//! available or `CADENCE_TEST_PG_URL` points at a server.

use cadence_db::pool;
use cadence_test_utils::TestDb;

const TABLES: &[&str] = &[
    "communication_strategies",
    "content_briefs",
    "content_correlation_rules",
    "content_drafts",
    "content_plans",
    "content_variants",
    "draft_revisions",
    "model_assignments",
    "organizations",
    "prompt_templates",
    "scheduled_posts",
    "suggested_topics",
];

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn migrations_create_every_table() {
    let db = TestDb::create().await;

    let counts = pool::table_counts(&db.pool).await.expect("table counts");
    let names: Vec<&str> = counts.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, TABLES);
    assert!(counts.iter().all(|(_, n)| *n == 0));

    db.drop().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn migrations_are_idempotent() {
    let db = TestDb::create().await;

    pool::run_migrations(&db.pool)
        .await
        .expect("second run should be a no-op");

    db.drop().await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn plan_status_is_checked() {
    let db = TestDb::create().await;
    let plan = cadence_test_utils::seed_plan(&db.pool, 1, 1).await;

    let result = sqlx::query("UPDATE content_plans SET status = 'archived' WHERE id = $1")
        .bind(plan.id)
        .execute(&db.pool)
        .await;
    assert!(result.is_err(), "unknown status must violate the CHECK");

    db.drop().await;
}
