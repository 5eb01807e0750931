//! Per-session chat history.
//!
//! A session is created implicitly by its first message and belongs to the
//! user who sent it. Messages alternate between the user's question
//! (`human`) and the model's answer (`ai`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::core::db::connect_sqlite;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    Human,
    Ai,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Human => "human",
            ChatRole::Ai => "ai",
        }
    }

    fn parse(value: &str) -> Result<Self, ApiError> {
        match value {
            "human" => Ok(ChatRole::Human),
            "ai" => Ok(ChatRole::Ai),
            other => Err(ApiError::Internal(format!("unknown message role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    #[serde(rename = "message")]
    pub content: String,
    #[serde(rename = "type")]
    pub role: ChatRole,
    pub created_at: String,
}

#[derive(Clone)]
pub struct ChatHistoryStore {
    pool: SqlitePool,
}

impl ChatHistoryStore {
    pub async fn new(db_path: &Path) -> Result<Self, ApiError> {
        let pool = connect_sqlite(db_path, 5).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init sessions table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('human', 'ai')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init messages table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Appends messages to a session in order, creating the session for
    /// `owner` if needed. A session owned by someone else is `NotFound`.
    pub async fn add_messages(
        &self,
        owner: &str,
        session_id: &str,
        messages: &[(ChatRole, &str)],
    ) -> Result<Vec<i64>, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, owner, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(owner)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        let stored_owner: String = sqlx::query_scalar("SELECT owner FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        if stored_owner != owner {
            return Err(session_not_found(session_id));
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let mut ids = Vec::with_capacity(messages.len());
        for (role, content) in messages {
            let result = sqlx::query(
                "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(role.as_str())
            .bind(content)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(ids)
    }

    pub async fn add_message(
        &self,
        owner: &str,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<i64, ApiError> {
        let ids = self.add_messages(owner, session_id, &[(role, content)]).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("message insert returned no id".to_string()))
    }

    /// The last `window` messages of a session in chronological order.
    pub async fn recent_messages(
        &self,
        session_id: &str,
        window: usize,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        if window == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT * FROM (
                SELECT id, session_id, role, content, created_at
                FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?
             ) ORDER BY id ASC",
        )
        .bind(session_id)
        .bind(window as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(row_to_message).collect()
    }

    /// Newest-first page of the owner's messages plus the unpaged total.
    pub async fn get_history(
        &self,
        owner: &str,
        session_id: Option<&str>,
        limit: i64,
    ) -> Result<(Vec<HistoryMessage>, i64), ApiError> {
        let rows = sqlx::query(
            "SELECT m.id, m.session_id, m.role, m.content, m.created_at
             FROM messages m JOIN sessions s ON s.id = m.session_id
             WHERE s.owner = ?1 AND (?2 IS NULL OR m.session_id = ?2)
             ORDER BY m.id DESC
             LIMIT ?3",
        )
        .bind(owner)
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM messages m JOIN sessions s ON s.id = m.session_id
             WHERE s.owner = ?1 AND (?2 IS NULL OR m.session_id = ?2)",
        )
        .bind(owner)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let messages = rows.iter().map(row_to_message).collect::<Result<Vec<_>, _>>()?;
        Ok((messages, total))
    }

    /// Deletes a session and its messages; returns how many messages went.
    /// Sessions of other users are left untouched and report 0.
    pub async fn clear_session(&self, owner: &str, session_id: &str) -> Result<u64, ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let deleted = sqlx::query(
            "DELETE FROM messages WHERE session_id IN (SELECT id FROM sessions WHERE id = ? AND owner = ?)",
        )
        .bind(session_id)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?
        .rows_affected();

        sqlx::query("DELETE FROM sessions WHERE id = ? AND owner = ?")
            .bind(session_id)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(deleted)
    }

    /// Session ids of `owner`, most recently active first.
    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<String>, ApiError> {
        let rows = sqlx::query(
            "SELECT s.id
             FROM sessions s LEFT JOIN messages m ON m.session_id = s.id
             WHERE s.owner = ?
             GROUP BY s.id
             ORDER BY COALESCE(MAX(m.id), 0) DESC, s.updated_at DESC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(|row| row.get::<String, _>("id")).collect())
    }

    pub async fn session_owner(&self, session_id: &str) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT owner FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }
}

pub fn session_not_found(session_id: &str) -> ApiError {
    ApiError::NotFound(format!("Session {} not found", session_id))
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryMessage, ApiError> {
    let role: String = row.get("role");
    Ok(HistoryMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        content: row.get("content"),
        role: ChatRole::parse(&role)?,
        created_at: row.get("created_at"),
    })
}
