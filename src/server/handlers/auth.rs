use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use crate::auth::guard::{expired_refresh_cookie, read_cookie, refresh_cookie, REFRESH_COOKIE};
use crate::auth::require_user;
use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// OAuth2 password-grant form (`application/x-www-form-urlencoded`).
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .auth
        .register(payload.username.trim(), &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "msg": "Your account has been successfully registered!" })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.auth.login(form.username.trim(), &form.password).await?;

    let cookie = refresh_cookie(
        &tokens.refresh_token,
        state.auth.refresh_ttl().num_seconds(),
        state.settings.auth.cookie_secure,
    )?;

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "access_token": tokens.access_token,
            "token_type": "bearer"
        })),
    ))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = read_cookie(&headers, REFRESH_COOKIE)
        .ok_or_else(|| ApiError::Unauthorized("Missing refresh token".to_string()))?;

    let access_token = state
        .auth
        .refresh_access_token(token)
        .await
        .ok_or_else(|| ApiError::Unauthorized("Could not refresh token".to_string()))?;

    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "bearer"
    })))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    state.auth.invalidate_all_tokens(&user).await?;

    let cookie = expired_refresh_cookie(state.settings.auth.cookie_secure)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Successfully logged out" })),
    ))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    state
        .auth
        .change_password(&user, &payload.old_password, &payload.new_password)
        .await?;

    Ok(Json(json!({ "message": "Password changed successfully" })))
}

pub async fn protected(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(json!({ "message": format!("Hello, {}!", user) })))
}
