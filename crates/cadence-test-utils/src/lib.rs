//! Shared fixtures for cadence database integration tests.
//!
//! One PostgreSQL server is shared per test binary; every test gets its own
//! freshly migrated database on it.
//!
//! - With **`CADENCE_TEST_PG_URL`** set, that server is used as is.
//! - Otherwise a container is started through testcontainers on first use.

use std::time::Duration;

use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use cadence_db::models::{ContentPlan, Organization, SchedulingMode};
use cadence_db::pool;
use cadence_db::queries::{organizations, plans};

struct SharedPg {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var("CADENCE_TEST_PG_URL") {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_string(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("16")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL of the shared PostgreSQL (no database name).
pub async fn pg_url() -> &'static str {
    &SHARED_PG.get_or_init(init_shared_pg).await.base_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated throwaway database. Call [`TestDb::drop`] when done.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create a uniquely named database and apply all migrations.
    pub async fn create() -> Self {
        let name = format!("cadence_test_{}", Uuid::new_v4().simple());

        let maint = maintenance_pool().await;
        let stmt = format!("CREATE DATABASE {name}");
        maint
            .execute(stmt.as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create database {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", pg_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, name }
    }

    /// Close the pool and drop the database.
    pub async fn drop(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let stmt = format!("DROP DATABASE IF EXISTS {}", self.name);
        let _ = maint.execute(stmt.as_str()).await;
        maint.close().await;
    }
}

/// Insert an organization named "Acme".
pub async fn seed_organization(pool: &PgPool) -> Organization {
    organizations::insert_organization(pool, "Acme", Some("manufacturing"), None)
        .await
        .expect("insert organization")
}

/// Insert an organization and a plan with the given quotas.
pub async fn seed_plan(pool: &PgPool, blog_quota: i32, sm_quota: i32) -> ContentPlan {
    let org = seed_organization(pool).await;
    plans::insert_plan(
        pool,
        &plans::NewContentPlan {
            organization_id: org.id,
            period_label: "2026-11".to_string(),
            blog_posts_quota: blog_quota,
            sm_posts_quota: sm_quota,
            correlate_posts: true,
            scheduling_mode: SchedulingMode::Auto,
            scheduling_preferences: json!({}),
        },
    )
    .await
    .expect("insert plan")
}
