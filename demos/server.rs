//! Demo server: reads settings from the environment, wires the estate entity set to
//! Postgres, mounts health/version plus the CRUD routes, and runs the task queue.

use async_trait::async_trait;
use estate_crud::config::load_rules;
use estate_crud::model::{install, Task};
use estate_crud::{
    app, AccessManager, AppState, CrudEngine, Dispatcher, EngineError, EntityRegistry, PgStore, Settings,
    TaskHandler, TaskRunner,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Logs e-mail tasks; delivery belongs to the mail service.
struct LogEmail;

#[async_trait]
impl TaskHandler for LogEmail {
    async fn handle(&self, task: &Task) -> Result<(), EngineError> {
        tracing::info!(task = %task.id, site = %task.site_id, data = %task.data, "email task");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("estate_crud=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));

    let engine = CrudEngine::new(store.clone(), Arc::new(EntityRegistry::new()));
    let mut dispatcher = Dispatcher::new(engine).with_platform_user_type(settings.platform_user_type);
    install(&mut dispatcher)?;

    let rules = load_rules(settings.access_rules_path.as_deref(), &settings.api_path)?;
    let state = AppState::new(dispatcher, AccessManager::with_rules(rules));

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let runner = TaskRunner::new(store, settings.worker_max, settings.worker_poll).handler("email", LogEmail);
    let worker = tokio::spawn(runner.run(async move {
        let _ = stop_rx.changed().await;
    }));

    let router = app(state, &settings.api_path, settings.body_limit);
    let listener = TcpListener::bind(&settings.listen_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = stop_tx.send(true);
    worker.await?;
    Ok(())
}
