use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use regex::Regex;
use serde::Serialize;

use super::password::{hash_password, verify_password};
use super::store::{User, UserStore};
use super::token::{TokenCodec, TokenKind};
use crate::core::config::settings::AuthSettings;
use crate::core::errors::ApiError;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 1024;
/// Login checks between sweeps of idle rate-limiter keys.
const LIMITER_SWEEP_EVERY: u64 = 256;

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Account and token lifecycle: registration, login, refresh, logout and
/// password changes. A token is honored only if it was issued no earlier than
/// the user's `last_password_change`, so bumping that watermark revokes every
/// outstanding token at once. Both sides are unix microseconds, and the
/// watermark is set one microsecond past the revoking call.
#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    codec: TokenCodec,
    access_ttl: Duration,
    refresh_ttl: Duration,
    login_limiter: Arc<DefaultKeyedRateLimiter<String>>,
    login_checks: Arc<AtomicU64>,
}

impl AuthService {
    pub fn new(users: UserStore, codec: TokenCodec, settings: &AuthSettings) -> Self {
        let per_minute =
            NonZeroU32::new(settings.login_attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            users,
            codec,
            access_ttl: Duration::minutes(settings.access_token_minutes as i64),
            refresh_ttl: Duration::days(settings.refresh_token_days as i64),
            login_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            login_checks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ApiError> {
        validate_username(username)?;
        validate_password(password)?;

        let hashed = hash_blocking(password.to_string()).await?;
        let created = self
            .users
            .create_user(username, &hashed, Utc::now().timestamp_micros())
            .await?;
        if !created {
            return Err(ApiError::Conflict(
                "That username is already taken, try another one!".to_string(),
            ));
        }

        tracing::info!(user = %username, "Registered new user");
        Ok(())
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, ApiError> {
        let Some(user) = self.users.get_by_username(username).await? else {
            return Ok(None);
        };
        let matches = verify_blocking(password.to_string(), user.hashed_password.clone()).await?;
        Ok(matches.then_some(user))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        if self.login_checks.fetch_add(1, Ordering::Relaxed) % LIMITER_SWEEP_EVERY
            == LIMITER_SWEEP_EVERY - 1
        {
            self.sweep_login_limiter();
        }
        if self
            .login_limiter
            .check_key(&username.to_lowercase())
            .is_err()
        {
            tracing::warn!(user = %username, "Login rate limit exceeded");
            return Err(ApiError::TooManyRequests);
        }

        let user = self
            .authenticate(username, password)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

        let access_token = self
            .codec
            .issue(&user.username, TokenKind::Access, self.access_ttl)?;
        let refresh_token = self
            .codec
            .issue(&user.username, TokenKind::Refresh, self.refresh_ttl)?;

        tracing::info!(user = %user.username, "User logged in");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Drops limiter entries for usernames that have fully replenished, so
    /// attempts with many distinct names do not accumulate state.
    pub fn sweep_login_limiter(&self) {
        let before = self.login_limiter.len();
        self.login_limiter.retain_recent();
        self.login_limiter.shrink_to_fit();
        tracing::debug!(before, after = self.login_limiter.len(), "Swept login rate limiter");
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<String, ApiError> {
        self.verify(token, TokenKind::Access).await
    }

    pub async fn verify_refresh_token(&self, token: &str) -> Result<String, ApiError> {
        self.verify(token, TokenKind::Refresh).await
    }

    async fn verify(&self, token: &str, kind: TokenKind) -> Result<String, ApiError> {
        let claims = self.codec.decode(token, kind)?;

        let user = self
            .users
            .get_by_username(&claims.sub)
            .await?
            .ok_or_else(ApiError::credentials)?;

        if claims.iat_us < user.last_password_change {
            tracing::debug!(user = %user.username, "Rejected token issued before credential change");
            return Err(ApiError::credentials());
        }

        Ok(user.username)
    }

    /// Mints a new access token from a valid refresh token. Any failure yields
    /// `None`.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Option<String> {
        let username = match self.verify_refresh_token(refresh_token).await {
            Ok(username) => username,
            Err(err) => {
                tracing::debug!("Refresh rejected: {}", err);
                return None;
            }
        };

        match self
            .codec
            .issue(&username, TokenKind::Access, self.access_ttl)
        {
            Ok(token) => Some(token),
            Err(err) => {
                tracing::error!("Failed to issue access token: {}", err);
                None
            }
        }
    }

    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        if self.authenticate(username, old_password).await?.is_none() {
            return Err(ApiError::BadRequest("Invalid current password".to_string()));
        }
        validate_password(new_password)?;

        let hashed = hash_blocking(new_password.to_string()).await?;
        let updated = self
            .users
            .update_password(username, &hashed, revocation_watermark())
            .await?;
        if !updated {
            return Err(ApiError::credentials());
        }

        tracing::info!(user = %username, "Password changed; outstanding tokens revoked");
        Ok(())
    }

    /// Logout: every token issued before now stops verifying.
    pub async fn invalidate_all_tokens(&self, username: &str) -> Result<bool, ApiError> {
        self.users
            .touch_password_change(username, revocation_watermark())
            .await
    }
}

/// Tokens issued up to and including the current microsecond fall below it.
fn revocation_watermark() -> i64 {
    Utc::now().timestamp_micros() + 1
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").expect("username pattern is valid"));
    if pattern.is_match(username) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Username must be 3-64 characters of letters, digits, '_', '.' or '-'".to_string(),
        ))
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ApiError::BadRequest("Password is too long".to_string()));
    }
    Ok(())
}

async fn hash_blocking(password: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(ApiError::internal)?
}

async fn verify_blocking(password: String, hashed: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hashed))
        .await
        .map_err(ApiError::internal)
}
