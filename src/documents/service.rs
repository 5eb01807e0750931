use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use super::loader::{extract_pdf_text, is_pdf, sanitize_filename, validate_document_name};
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;
use crate::rag::{RagStore, RecursiveSplitter, SourceSummary, StoredChunk};

/// One file part of an upload request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub embedding_model: String,
    pub batch_size: usize,
    pub max_chunks_per_document: usize,
}

/// Turns uploaded documents into embedded, owner-scoped chunks.
#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn RagStore>,
    embedder: Arc<dyn LlmProvider>,
    splitter: RecursiveSplitter,
    options: IngestOptions,
    upload_dir: PathBuf,
}

impl DocumentService {
    pub fn new(
        store: Arc<dyn RagStore>,
        embedder: Arc<dyn LlmProvider>,
        splitter: RecursiveSplitter,
        options: IngestOptions,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            embedder,
            splitter,
            options,
            upload_dir,
        }
    }

    /// Indexes and stores every PDF in `files`; other files are skipped.
    /// Returns the names that were processed.
    ///
    /// Every name and every text layer is checked before anything is
    /// indexed, so a bad file fails the request without side effects. A file
    /// lands on disk only after its chunks are stored.
    pub async fn upload(&self, owner: &str, files: Vec<UploadedFile>) -> Result<Vec<String>, ApiError> {
        let mut accepted = Vec::new();
        for file in files {
            if !is_pdf(&file.filename) {
                tracing::debug!(user = %owner, file = %file.filename, "Skipping non-PDF upload");
                continue;
            }
            let name = sanitize_filename(&file.filename)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid filename '{}'", file.filename)))?;
            if file.bytes.is_empty() {
                return Err(ApiError::BadRequest(format!("'{}' is empty", name)));
            }
            accepted.push((name, file.bytes));
        }

        let mut extracted = Vec::with_capacity(accepted.len());
        for (name, bytes) in accepted {
            let text = extract_pdf_text(&name, bytes.clone()).await?;
            extracted.push((name, bytes, text));
        }

        let mut processed = Vec::with_capacity(extracted.len());
        for (name, bytes, text) in extracted {
            let chunks = self.ingest_text(owner, &name, &text).await?;
            if let Err(err) = self.store_file(owner, &name, &bytes).await {
                self.store.delete_source(owner, &name).await?;
                return Err(err);
            }

            tracing::info!(user = %owner, file = %name, chunks, "Indexed document");
            processed.push(name);
        }

        Ok(processed)
    }

    async fn store_file(&self, owner: &str, name: &str, bytes: &[u8]) -> Result<(), ApiError> {
        let owner_dir = self.upload_dir.join(owner);
        tokio::fs::create_dir_all(&owner_dir)
            .await
            .map_err(ApiError::internal)?;
        tokio::fs::write(owner_dir.join(name), bytes)
            .await
            .map_err(ApiError::internal)
    }

    /// Splits, embeds and stores `text` as document `source`, replacing any
    /// earlier version of it. Returns the number of chunks stored.
    pub async fn ingest_text(&self, owner: &str, source: &str, text: &str) -> Result<usize, ApiError> {
        let chunks = self.splitter.split(text);
        if chunks.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "No extractable text in '{}'",
                source
            )));
        }
        if chunks.len() > self.options.max_chunks_per_document {
            return Err(ApiError::PayloadTooLarge(format!(
                "'{}' produced {} chunks, the limit is {}",
                source,
                chunks.len(),
                self.options.max_chunks_per_document
            )));
        }

        let total_chunks = chunks.len();
        let mut items = Vec::with_capacity(total_chunks);

        for batch in chunks.chunks(self.options.batch_size.max(1)) {
            let inputs: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self
                .embedder
                .embed(&inputs, &self.options.embedding_model)
                .await?;
            if embeddings.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                let stored = StoredChunk {
                    chunk_id: Uuid::new_v4().to_string(),
                    content: chunk.text.clone(),
                    source: source.to_string(),
                    owner: owner.to_string(),
                    metadata: Some(json!({
                        "source": source,
                        "chunk_index": chunk.chunk_index,
                        "total_chunks": total_chunks,
                        "start_offset": chunk.start_offset,
                    })),
                };
                items.push((stored, embedding));
            }
        }

        self.store.replace_source(owner, source, items).await?;
        Ok(total_chunks)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<SourceSummary>, ApiError> {
        self.store.list_sources(owner).await
    }

    /// Removes a document's chunks and its stored file.
    pub async fn delete(&self, owner: &str, source: &str) -> Result<usize, ApiError> {
        let name = validate_document_name(source)
            .ok_or_else(|| ApiError::BadRequest("Invalid document name".to_string()))?;

        let removed = self.store.delete_source(owner, name).await?;

        let file_removed = match tokio::fs::remove_file(self.upload_dir.join(owner).join(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(ApiError::internal(e)),
        };

        if removed == 0 && !file_removed {
            return Err(ApiError::NotFound(format!("Document '{}' not found", name)));
        }

        tracing::info!(user = %owner, file = %name, chunks = removed, "Deleted document");
        Ok(removed)
    }
}
