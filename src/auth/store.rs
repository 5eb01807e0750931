use std::path::Path;

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::core::db::connect_sqlite;
use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hashed_password: String,
    /// Unix microseconds. Tokens issued before this instant are no longer honored.
    pub last_password_change: i64,
    pub created_at: String,
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub async fn new(db_path: &Path) -> Result<Self, ApiError> {
        let pool = connect_sqlite(db_path, 4).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                hashed_password TEXT NOT NULL,
                last_password_change INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init users table: {}", e)))?;

        Ok(())
    }

    /// Returns `false` when the username is already taken.
    pub async fn create_user(
        &self,
        username: &str,
        hashed_password: &str,
        created_at: i64,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO users (username, hashed_password, last_password_change, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(username)
        .bind(hashed_password)
        .bind(created_at)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let row = sqlx::query(
            "SELECT id, username, hashed_password, last_password_change, created_at
             FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            hashed_password: row.get("hashed_password"),
            last_password_change: row.get("last_password_change"),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn update_password(
        &self,
        username: &str,
        hashed_password: &str,
        changed_at: i64,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "UPDATE users SET hashed_password = ?1, last_password_change = ?2 WHERE username = ?3",
        )
        .bind(hashed_password)
        .bind(changed_at)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves the revocation watermark forward without touching the password.
    pub async fn touch_password_change(&self, username: &str, at: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("UPDATE users SET last_password_change = ?1 WHERE username = ?2")
            .bind(at)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(&dir.path().join("users.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let (_dir, store) = test_store().await;

        assert!(store.create_user("alice", "hash", 100).await.unwrap());
        let user = store.get_by_username("alice").await.unwrap().unwrap();

        assert_eq!(user.username, "alice");
        assert_eq!(user.hashed_password, "hash");
        assert_eq!(user.last_password_change, 100);
        assert!(store.get_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_refused() {
        let (_dir, store) = test_store().await;

        assert!(store.create_user("alice", "hash", 100).await.unwrap());
        assert!(!store.create_user("alice", "other", 200).await.unwrap());

        let user = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.hashed_password, "hash");
    }

    #[tokio::test]
    async fn password_updates_move_watermark() {
        let (_dir, store) = test_store().await;
        store.create_user("alice", "hash", 100).await.unwrap();

        assert!(store.update_password("alice", "new-hash", 150).await.unwrap());
        assert!(store.touch_password_change("alice", 175).await.unwrap());
        assert!(!store.touch_password_change("ghost", 175).await.unwrap());

        let user = store.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.hashed_password, "new-hash");
        assert_eq!(user.last_password_change, 175);
    }
}
