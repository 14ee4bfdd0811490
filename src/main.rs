use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod exam;
mod generation;
mod lock_store;
mod pool;
mod session;
mod state;
mod web;

use crate::config::load_settings;
use crate::error::Result as AppResult;
use crate::generation::GenerationClient;
use crate::lock_store::build_lock_store;
use crate::pool::QuestionPoolCache;
use crate::session::{SessionManagerHandle, SessionServices};
use crate::state::AppState;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!(
        server.port = app_settings.server.port,
        pool.source_type = ?app_settings.pool.source_type,
        lock_store.kind = ?app_settings.lock_store.kind,
        sessions.idle_timeout_minutes = app_settings.sessions.idle_timeout_minutes,
        "Configuration loaded"
    );

    let pool = Arc::new(QuestionPoolCache::new(app_settings.pool.clone()).await?);
    tracing::info!(
        pool.questions.count = pool.questions().await.len(),
        "Question pool initialized"
    );

    let lock_store = build_lock_store(&app_settings.lock_store);

    let generation = GenerationClient::new(&app_settings.generation)?;
    if !generation.is_configured() {
        tracing::warn!("generation.base_url not set; exam generation is disabled");
    }

    let session_manager = SessionManagerHandle::spawn(
        32,
        SessionServices {
            pool: Arc::clone(&pool),
            lock_store,
            generation,
            config: app_settings.sessions.clone(),
        },
    );

    let app_state = AppState {
        session_manager,
        pool,
        server_config: Arc::new(app_settings.server.clone()),
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
