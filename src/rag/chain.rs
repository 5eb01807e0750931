//! History-aware retrieval chain: embed the question, retrieve the owner's
//! closest chunks, prepend the session's recent turns, ask the chat model and
//! record the exchange.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::prompt::{build_messages, format_docs, format_docs_structured, source_refs, SourceRef};
use super::store::RagStore;
use crate::core::config::{ContextFormat, Settings};
use crate::core::errors::ApiError;
use crate::history::{session_not_found, ChatHistoryStore, ChatRole};
use crate::llm::{ChatRequest, LlmProvider};

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub session_id: String,
    pub sources: Vec<SourceRef>,
}

/// Events produced by [`RagChain::ask_stream`].
#[derive(Debug, Clone, PartialEq)]
pub enum AskEvent {
    Meta {
        session_id: String,
        sources: Vec<SourceRef>,
    },
    Token(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: Option<f64>,
    pub top_k: usize,
    pub history_window: usize,
    pub max_question_chars: usize,
    pub context_format: ContextFormat,
}

impl ChainOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            chat_model: settings.llm.chat_model.clone(),
            embedding_model: settings.embedding.model.clone(),
            temperature: settings.llm.temperature,
            top_k: settings.rag.top_k,
            history_window: settings.rag.history_window,
            max_question_chars: settings.rag.max_question_chars,
            context_format: settings.rag.context_format,
        }
    }
}

struct PreparedQuestion {
    session_id: String,
    question: String,
    request: ChatRequest,
    sources: Vec<SourceRef>,
}

#[derive(Clone)]
pub struct RagChain {
    store: Arc<dyn RagStore>,
    history: ChatHistoryStore,
    chat: Arc<dyn LlmProvider>,
    embedder: Arc<dyn LlmProvider>,
    options: ChainOptions,
}

impl RagChain {
    pub fn new(
        store: Arc<dyn RagStore>,
        history: ChatHistoryStore,
        chat: Arc<dyn LlmProvider>,
        embedder: Arc<dyn LlmProvider>,
        options: ChainOptions,
    ) -> Self {
        Self {
            store,
            history,
            chat,
            embedder,
            options,
        }
    }

    pub async fn ask(
        &self,
        owner: &str,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<AskResponse, ApiError> {
        let prepared = self.prepare(owner, question, session_id).await?;

        let answer = self
            .chat
            .chat(prepared.request, &self.options.chat_model)
            .await?;

        self.history
            .add_messages(
                owner,
                &prepared.session_id,
                &[(ChatRole::Human, &prepared.question), (ChatRole::Ai, &answer)],
            )
            .await?;

        tracing::info!(
            user = %owner,
            session = %prepared.session_id,
            sources = prepared.sources.len(),
            "Answered question"
        );

        Ok(AskResponse {
            answer,
            session_id: prepared.session_id,
            sources: prepared.sources,
        })
    }

    /// Streaming variant of [`ask`](Self::ask). Validation, retrieval and
    /// opening the completion stream happen before this returns, so those
    /// failures surface as plain errors. The exchange is written to history
    /// only once the model has finished.
    pub async fn ask_stream(
        &self,
        owner: &str,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<mpsc::Receiver<AskEvent>, ApiError> {
        let prepared = self.prepare(owner, question, session_id).await?;

        let mut tokens = self
            .chat
            .stream_chat(prepared.request, &self.options.chat_model)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let history = self.history.clone();
        let owner = owner.to_string();
        let PreparedQuestion {
            session_id,
            question,
            sources,
            ..
        } = prepared;

        tokio::spawn(async move {
            let meta = AskEvent::Meta {
                session_id: session_id.clone(),
                sources,
            };
            if tx.send(meta).await.is_err() {
                return;
            }

            let mut answer = String::new();
            while let Some(item) = tokens.recv().await {
                match item {
                    Ok(delta) => {
                        answer.push_str(&delta);
                        if tx.send(AskEvent::Token(delta)).await.is_err() {
                            tracing::debug!(session = %session_id, "Client left mid-stream");
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::error!(session = %session_id, "Streaming completion failed: {}", err);
                        let _ = tx
                            .send(AskEvent::Error(
                                "An error occurred while querying the LLM".to_string(),
                            ))
                            .await;
                        return;
                    }
                }
            }

            let saved = history
                .add_messages(
                    &owner,
                    &session_id,
                    &[(ChatRole::Human, &question), (ChatRole::Ai, &answer)],
                )
                .await;

            let last = match saved {
                Ok(_) => AskEvent::Done,
                Err(err) => {
                    tracing::error!(session = %session_id, "Failed to save chat history: {}", err);
                    AskEvent::Error("Failed to save chat history".to_string())
                }
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }

    async fn prepare(
        &self,
        owner: &str,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<PreparedQuestion, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::BadRequest("Question must not be empty".to_string()));
        }
        if question.chars().count() > self.options.max_question_chars {
            return Err(ApiError::BadRequest(format!(
                "Question is longer than {} characters",
                self.options.max_question_chars
            )));
        }

        let session_id = self.resolve_session(owner, session_id).await?;

        let query_embedding = self
            .embedder
            .embed(&[question.to_string()], &self.options.embedding_model)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("embedding provider returned no vector".to_string()))?;

        let results = self
            .store
            .search(&query_embedding, self.options.top_k, owner)
            .await?;
        let context = match self.options.context_format {
            ContextFormat::Plain => format_docs(&results),
            ContextFormat::Structured => format_docs_structured(&results).to_string(),
        };

        let history = self
            .history
            .recent_messages(&session_id, self.options.history_window)
            .await?;

        tracing::debug!(
            session = %session_id,
            retrieved = results.len(),
            history = history.len(),
            "Assembled prompt"
        );

        let request = ChatRequest::new(build_messages(&history, &context, question))
            .with_temperature(self.options.temperature);

        Ok(PreparedQuestion {
            session_id,
            question: question.to_string(),
            request,
            sources: source_refs(&results),
        })
    }

    async fn resolve_session(&self, owner: &str, requested: Option<&str>) -> Result<String, ApiError> {
        let Some(requested) = requested.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(Uuid::new_v4().to_string());
        };

        if requested.len() > MAX_SESSION_ID_LEN {
            return Err(ApiError::BadRequest(format!(
                "session_id must be at most {} bytes",
                MAX_SESSION_ID_LEN
            )));
        }

        match self.history.session_owner(requested).await? {
            Some(existing) if existing != owner => Err(session_not_found(requested)),
            _ => Ok(requested.to_string()),
        }
    }
}
