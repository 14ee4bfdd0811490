use axum::{
    Router,
    routing::{any, get, post},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration as TokioDuration;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::{ConfigError, Result as AppResult};
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_PER_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;

fn cors_layer(server_config: &ServerConfig) -> CorsLayer {
    let cors_origins_result: Result<Vec<HeaderValue>, _> = server_config
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .map_err(|e| format!("Invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    let cors_origins = cors_origins_result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "CORS config error. Defaulting to restrictive");
        vec![]
    });

    if cors_origins.is_empty() {
        tracing::info!("Restrictive CORS policy applied (no origins configured)");
        return CorsLayer::new();
    }

    tracing::info!(
        cors.origins.count = cors_origins.len(),
        "CORS configured with allowed origins"
    );
    CorsLayer::new()
        .allow_methods(vec![http::Method::GET, http::Method::POST])
        .allow_origin(cors_origins)
        .allow_credentials(true)
        .allow_headers(vec![
            http::header::CONTENT_TYPE,
            http::header::AUTHORIZATION,
            http::header::ACCEPT,
        ])
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/sessions",
            post(handlers::create_session_handler).get(handlers::list_sessions_handler),
        )
        .route("/api/sessions/{session_id}", get(handlers::get_session_handler))
        .route(
            "/api/sessions/{session_id}/commands",
            post(handlers::session_command_handler),
        )
        .route("/api/pool/categories", get(handlers::pool_categories_handler))
        .route("/api/pool/refresh", post(handlers::refresh_pool_handler))
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port,
    cors.origins.count = server_config.cors_origins.len()
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let cors = cors_layer(&server_config);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_PER_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| {
                ConfigError::InvalidValue("rate limiter period and burst must be non-zero".to_string())
            })?,
    );
    tracing::info!(
        rate_limit.per_ms = RATE_LIMIT_PER_MS,
        rate_limit.burst_size = RATE_LIMIT_BURST,
        "Rate limiter configured"
    );

    let governor_limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TokioDuration::from_secs(60)).await;
            let limiter_size = governor_limiter.len();
            if limiter_size > 1_000_000 {
                tracing::warn!(
                    rate_limiter.storage_size = limiter_size,
                    "Rate limiting storage size is large"
                );
            }
            governor_limiter.retain_recent();
        }
    });

    let app = router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new()
                .quality(CompressionLevel::Default)
                .gzip(true),
        )
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!(server.address = %addr, "HTTP server starting");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenerationConfig, PoolConfig, PoolSourceType, SessionsConfig};
    use crate::exam::question::{Answer, Question, QuestionType};
    use crate::generation::GenerationClient;
    use crate::lock_store::MemoryLockStore;
    use crate::pool::{PoolSnapshot, QuestionPoolCache};
    use crate::session::{SessionManagerHandle, SessionServices};
    use serde_json::{Value as JsonValue, json};

    async fn serve(admin_api_key: Option<&str>) -> String {
        let questions = ["Paris", "Madrid", "Rome"]
            .iter()
            .map(|city| {
                Question::new(
                    QuestionType::Matching,
                    Some("capitals"),
                    format!("Capital city: {city}"),
                    Answer::text(*city),
                )
            })
            .collect();
        let pool = Arc::new(QuestionPoolCache::from_snapshot(
            PoolSnapshot {
                questions,
                ..PoolSnapshot::default()
            },
            PoolConfig {
                source_type: PoolSourceType::None,
                file_path: None,
                http_url: None,
            },
        ));
        let generation = GenerationClient::new(&GenerationConfig {
            base_url: None,
            timeout_seconds: 5,
            default_template: "default".to_string(),
            default_word_template: "default".to_string(),
        })
        .unwrap();
        let session_manager = SessionManagerHandle::spawn(
            8,
            SessionServices {
                pool: pool.clone(),
                lock_store: Arc::new(MemoryLockStore::new()),
                generation,
                config: SessionsConfig {
                    idle_timeout_minutes: 60,
                    channel_buffer: 8,
                },
            },
        );
        let app_state = AppState {
            session_manager,
            pool,
            server_config: Arc::new(ServerConfig {
                port: 0,
                cors_origins: Vec::new(),
                admin_api_key: admin_api_key.map(str::to_string),
            }),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(app_state)).await.unwrap();
        });
        format!("http://{address}")
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_http() {
        let base = serve(None).await;
        let client = reqwest::Client::new();

        let details: JsonValue = client
            .post(format!("{base}/api/sessions"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let session_id = details["session_id"].as_str().unwrap().to_string();
        assert_eq!(details["pool_size"], 3);

        let view: JsonValue = client
            .get(format!("{base}/api/sessions/{session_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["items"].as_array().unwrap().len(), 3);
        let key = view["items"][0]["key"].as_str().unwrap().to_string();

        let reply: JsonValue = client
            .post(format!("{base}/api/sessions/{session_id}/commands"))
            .json(&json!({"command": "ToggleQuestionLock", "key": key}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["outcome"]["lock"]["locked"], true);
        assert_eq!(reply["view"]["locked_question_count"], 1);

        let response = client
            .post(format!("{base}/api/sessions/{session_id}/commands"))
            .json(&json!({"command": "RemoveQuestion", "key": key}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 409);
        let body: JsonValue = response.json().await.unwrap();
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn test_unknown_session_and_pool_endpoints() {
        let base = serve(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{base}/api/sessions/{}", uuid::Uuid::new_v4()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);

        let counts: JsonValue = client
            .get(format!("{base}/api/pool/categories"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(counts["matching"]["capitals"], 3);

        let response = client
            .post(format!("{base}/api/pool/refresh"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let refreshed: JsonValue = client
            .post(format!("{base}/api/pool/refresh"))
            .header("Authorization", "ApiKey s3cret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(refreshed["questions"], 0);
    }
}
