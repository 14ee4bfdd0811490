use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Result as WebResult, WebError};
use crate::exam::SessionView;
use crate::exam::grouping::CategoryCounts;
use crate::exam::messages::SessionCommand;
use crate::session::{CommandReply, SessionActorHandle, SessionDetails};
use crate::state::AppState;

#[derive(Deserialize, Debug, Default)]
pub struct CreateSessionRequest {
    /// Resume a session whose locks were persisted under this id.
    pub session_id: Option<Uuid>,
}

#[derive(Serialize, Debug)]
pub struct PoolRefreshResponse {
    pub questions: usize,
    pub sessions_notified: usize,
}

pub async fn create_session_handler(
    State(app_state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> WebResult<Json<SessionDetails>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    tracing::info!(request.session_id = ?payload.session_id, "HTTP: Received create_session request");

    let details = app_state
        .session_manager
        .create_session(payload.session_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create session");
            WebError::InternalServerError(e)
        })?;

    Ok(Json(details))
}

pub async fn list_sessions_handler(
    State(app_state): State<AppState>,
) -> Json<Vec<SessionDetails>> {
    Json(app_state.session_manager.list_sessions().await)
}

pub async fn get_session_handler(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> WebResult<Json<SessionView>> {
    let handle = session_handle(&app_state, session_id).await?;
    Ok(Json(handle.snapshot().await?))
}

pub async fn session_command_handler(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(command): Json<SessionCommand>,
) -> WebResult<Json<CommandReply>> {
    tracing::info!(
        session.id = %session_id,
        command = command.name(),
        "HTTP: Received session command"
    );
    let handle = session_handle(&app_state, session_id).await?;
    Ok(Json(handle.execute(command).await?))
}

pub async fn pool_categories_handler(State(app_state): State<AppState>) -> Json<CategoryCounts> {
    Json(app_state.pool.category_counts().await)
}

pub async fn refresh_pool_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<Json<PoolRefreshResponse>> {
    tracing::info!("HTTP: Received refresh_pool request");

    if let Some(expected_key) = app_state.server_config.admin_api_key.as_deref() {
        authorize(&headers, expected_key)?;
    }

    let questions = app_state.pool.refresh().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to refresh question pool");
        WebError::InternalServerError(format!("Failed to refresh question pool: {}", e))
    })?;

    let sessions_notified = app_state
        .session_manager
        .pool_changed(questions.clone())
        .await
        .map_err(WebError::InternalServerError)?;

    Ok(Json(PoolRefreshResponse {
        questions: questions.len(),
        sessions_notified,
    }))
}

async fn session_handle(app_state: &AppState, session_id: Uuid) -> WebResult<SessionActorHandle> {
    app_state
        .session_manager
        .get_session_handle(session_id)
        .await
        .ok_or(WebError::SessionNotFound(session_id))
}

/// Checks `Authorization: ApiKey <key>`.
fn authorize(headers: &HeaderMap, expected_key: &str) -> WebResult<()> {
    let Some(auth_header_val) = headers.get(http::header::AUTHORIZATION) else {
        tracing::warn!("Unauthorized attempt to refresh pool: Missing Authorization header.");
        return Err(WebError::Unauthorized(
            "Missing Authorization header".to_string(),
        ));
    };

    let auth_header_str = auth_header_val.to_str().unwrap_or("");
    let Some(provided_key) = auth_header_str.strip_prefix("ApiKey ") else {
        tracing::warn!(
            "Unauthorized attempt to refresh pool: Authorization header format incorrect. Expected 'ApiKey <key>'."
        );
        return Err(WebError::Unauthorized(
            "Invalid Authorization header format. Expected 'ApiKey <key>'".to_string(),
        ));
    };

    if provided_key.trim() != expected_key {
        tracing::warn!("Unauthorized attempt to refresh pool: Invalid API key provided.");
        return Err(WebError::Unauthorized("Invalid API key".to_string()));
    }
    Ok(())
}
