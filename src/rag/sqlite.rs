//! SQLite-backed RAG store.
//!
//! Chunk text and metadata live in SQLite; similarity search is a
//! brute-force cosine scan over the owner's embeddings.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::store::{ChunkSearchResult, RagStore, SourceSummary, StoredChunk};
use crate::core::db::connect_sqlite;
use crate::core::errors::ApiError;

pub struct SqliteRagStore {
    pool: SqlitePool,
}

impl SqliteRagStore {
    pub async fn new(db_path: &Path) -> Result<Self, ApiError> {
        let pool = connect_sqlite(db_path, 4).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_chunks (
                chunk_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                owner TEXT NOT NULL,
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_owner_source ON rag_chunks(owner, source)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: Option<String> = row.get("metadata");
        let metadata = metadata_str.and_then(|raw| serde_json::from_str::<Value>(&raw).ok());

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            source: row.get("source"),
            owner: row.get("owner"),
            metadata,
        }
    }

    async fn insert_all(
        tx: &mut Transaction<'_, Sqlite>,
        items: &[(StoredChunk, Vec<f32>)],
    ) -> Result<(), ApiError> {
        for (chunk, embedding) in items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = match &chunk.metadata {
                Some(metadata) => serde_json::to_string(metadata).map_err(ApiError::internal)?,
                None => "{}".to_string(),
            };

            sqlx::query(
                "INSERT OR REPLACE INTO rag_chunks (chunk_id, content, source, owner, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&chunk.owner)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(ApiError::internal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RagStore for SqliteRagStore {
    async fn insert_batch(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;
        Self::insert_all(&mut tx, &items).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn replace_source(
        &self,
        owner: &str,
        source: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM rag_chunks WHERE owner = ?1 AND source = ?2")
            .bind(owner)
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        Self::insert_all(&mut tx, &items).await?;
        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        owner: &str,
    ) -> Result<Vec<ChunkSearchResult>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_id, content, source, owner, metadata, embedding
             FROM rag_chunks
             WHERE owner = ?1",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<ChunkSearchResult> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
                let embedding_bytes = embedding_bytes.filter(|bytes| !bytes.is_empty())?;
                let stored_emb = Self::deserialize_embedding(&embedding_bytes);
                let score = Self::cosine_similarity(query_embedding, &stored_emb);

                Some(ChunkSearchResult {
                    chunk: Self::row_to_chunk(row),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    async fn delete_source(&self, owner: &str, source: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM rag_chunks WHERE owner = ?1 AND source = ?2")
            .bind(owner)
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn list_sources(&self, owner: &str) -> Result<Vec<SourceSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS chunks
             FROM rag_chunks
             WHERE owner = ?1
             GROUP BY source
             ORDER BY source",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| SourceSummary {
                source: row.get("source"),
                chunks: row.get::<i64, _>("chunks") as usize,
            })
            .collect())
    }

    async fn count(&self, owner: &str) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE owner = ?1")
            .bind(owner)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(count as usize)
    }
}
