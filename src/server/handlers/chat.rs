use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_user;
use crate::core::errors::ApiError;
use crate::rag::AskEvent;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    let response = state
        .rag
        .ask(&user, &payload.question, payload.session_id.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn ask_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let rx = state
        .rag
        .ask_stream(&user, &payload.question, payload.session_id.as_deref())
        .await?;

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse_event(event)), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: AskEvent) -> Event {
    let (name, data) = match event {
        AskEvent::Meta {
            session_id,
            sources,
        } => (
            "meta",
            json!({ "session_id": session_id, "sources": sources }),
        ),
        AskEvent::Token(content) => ("token", json!({ "content": content })),
        AskEvent::Done => ("done", json!({})),
        AskEvent::Error(message) => ("error", json!({ "error": message })),
    };
    Event::default().event(name).data(data.to_string())
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    let limit = sanitize_limit(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    let session_id = query
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let (messages, total) = state.history.get_history(&user, session_id, limit).await?;
    Ok(Json(json!({ "messages": messages, "total": total })))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    let deleted = state.history.clear_session(&user, &session_id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }

    tracing::info!(user = %user, session = %session_id, deleted, "Cleared chat history");
    Ok(Json(json!({
        "message": format!("Chat history cleared for session {}", session_id)
    })))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    let sessions = state.history.list_sessions(&user).await?;
    Ok(Json(json!({ "sessions": sessions })))
}

fn sanitize_limit(limit: i64) -> i64 {
    if limit <= 0 {
        return 1;
    }
    limit.min(MAX_HISTORY_LIMIT)
}
