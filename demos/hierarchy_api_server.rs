use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use plant_hierarchy::api::{HasPool, HierarchyApp};
use plant_hierarchy::models::OrphanPolicy;

#[derive(Clone)]
struct DemoApp {
    pool: Arc<PgPool>,
    orphan_policy: OrphanPolicy,
}

impl HasPool for DemoApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl HierarchyApp for DemoApp {
    fn orphan_policy(&self) -> OrphanPolicy {
        self.orphan_policy
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let database_url = env::var("DATABASE_URL")
        .context("DATABASE_URL is required to run demos/hierarchy_api_server.rs")?;
    let bind = env::var("HIERARCHY_DEMO_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid HIERARCHY_DEMO_BIND '{}'", bind))?;

    let orphan_policy = match env::var("HIERARCHY_DEMO_ORPHAN_POLICY").as_deref() {
        Ok("reject") => OrphanPolicy::Reject,
        _ => OrphanPolicy::RepairToRoot,
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    plant_hierarchy::db::create_hierarchy_tables(&pool)
        .await
        .context("failed to run hierarchy migrations")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    let app_state = DemoApp {
        pool: Arc::new(pool),
        orphan_policy,
    };

    let api_v1 = Router::new()
        .route("/healthz", get(health_handler))
        .merge(plant_hierarchy::api::routes::<DemoApp>());

    let app = Router::new().nest("/api/v1", api_v1).with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    println!(
        "plant_hierarchy demo server listening on http://{}",
        bind_addr
    );
    println!("api base path: /api/v1");
    println!("set HIERARCHY_DEMO_ORPHAN_POLICY=reject to fail rebuilds on orphans");

    axum::serve(listener, app)
        .await
        .context("demo server failed")
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}
