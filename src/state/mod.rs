use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthService, TokenCodec, UserStore};
use crate::core::config::{AppPaths, Settings};
use crate::core::security::init_jwt_secret;
use crate::documents::{DocumentService, IngestOptions};
use crate::history::ChatHistoryStore;
use crate::llm::{LlmProvider, OpenAiProvider};
use crate::rag::{ChainOptions, RagChain, RagStore, RecursiveSplitter, SqliteRagStore};

pub mod error;

use error::InitializationError;

/// Application state shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: AuthService,
    pub history: ChatHistoryStore,
    pub documents: DocumentService,
    pub rag: RagChain,
}

impl AppState {
    /// Connects to the configured OpenAI-compatible endpoints and wires the
    /// stores under `paths`.
    pub async fn initialize(
        paths: Arc<AppPaths>,
        settings: Settings,
    ) -> Result<Arc<Self>, InitializationError> {
        let timeout = Duration::from_secs(settings.llm.request_timeout_secs);
        let chat: Arc<dyn LlmProvider> = Arc::new(
            OpenAiProvider::new(&settings.llm.base_url, settings.llm.api_key.as_deref(), timeout)
                .map_err(|e| InitializationError::Llm(e.into()))?,
        );
        let embedder: Arc<dyn LlmProvider> = Arc::new(
            OpenAiProvider::new(
                settings.embedding_base_url(),
                settings.embedding_api_key(),
                timeout,
            )
            .map_err(|e| InitializationError::Llm(e.into()))?,
        );

        if settings.llm.api_key.is_none() {
            tracing::warn!("No LLM API key configured (llm.api_key / OPENAI_KEY)");
        }

        Self::build(&paths, settings, chat, embedder).await
    }

    /// Wires the stores and services together around the given providers.
    pub async fn build(
        paths: &AppPaths,
        settings: Settings,
        chat: Arc<dyn LlmProvider>,
        embedder: Arc<dyn LlmProvider>,
    ) -> Result<Arc<Self>, InitializationError> {
        let secret = init_jwt_secret(&settings, paths).map_err(|e| InitializationError::Auth(e.into()))?;
        let users = UserStore::new(&paths.db_path)
            .await
            .map_err(|e| InitializationError::Auth(e.into()))?;
        let auth = AuthService::new(users, TokenCodec::new(secret), &settings.auth);

        let history = ChatHistoryStore::new(&paths.db_path)
            .await
            .map_err(|e| InitializationError::History(e.into()))?;

        let rag_store: Arc<dyn RagStore> = Arc::new(
            SqliteRagStore::new(&paths.rag_db_path)
                .await
                .map_err(|e| InitializationError::Rag(e.into()))?,
        );

        let splitter = RecursiveSplitter::new(settings.rag.chunk_size, settings.rag.chunk_overlap)
            .map_err(|e| InitializationError::Rag(e.into()))?;
        let upload_dir = settings.upload_dir(paths);
        let documents = DocumentService::new(
            rag_store.clone(),
            embedder.clone(),
            splitter,
            IngestOptions {
                embedding_model: settings.embedding.model.clone(),
                batch_size: settings.embedding.batch_size,
                max_chunks_per_document: settings.rag.max_chunks_per_document,
            },
            upload_dir.clone(),
        );

        let rag = RagChain::new(
            rag_store,
            history.clone(),
            chat,
            embedder,
            ChainOptions::from_settings(&settings),
        );

        tracing::info!(
            data_dir = %paths.user_data_dir.display(),
            upload_dir = %upload_dir.display(),
            "Application state initialized"
        );

        Ok(Arc::new(AppState {
            settings: Arc::new(settings),
            auth,
            history,
            documents,
            rag,
        }))
    }
}
