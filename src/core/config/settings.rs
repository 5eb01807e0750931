use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::paths::AppPaths;
use crate::core::errors::ApiError;

/// Typed view over the merged `config.yml` + `secrets.yaml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub rag: RagSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub jwt_secret: Option<String>,
    pub access_token_minutes: u64,
    pub refresh_token_days: u64,
    pub cookie_secure: bool,
    pub login_attempts_per_minute: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_minutes: 30,
            refresh_token_days: 7,
            cookie_secure: true,
            login_attempts_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            temperature: None,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Falls back to `llm.base_url` when unset.
    pub base_url: Option<String>,
    /// Falls back to `llm.api_key` when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            batch_size: 64,
        }
    }
}

/// How retrieved chunks are rendered into the prompt context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFormat {
    /// Chunk contents separated by blank lines.
    #[default]
    Plain,
    /// `{"chunks": [...]}` with numbered entries the model can cite.
    Structured,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub history_window: usize,
    pub max_question_chars: usize,
    pub max_chunks_per_document: usize,
    pub context_format: ContextFormat,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 3,
            history_window: 1,
            max_question_chars: 8000,
            max_chunks_per_document: 5000,
            context_format: ContextFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub upload_dir: Option<String>,
    pub max_upload_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: None,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Console and file log output. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Log files are named `<file_prefix>.<date>.log` under the log directory.
    pub file_prefix: String,
    /// Rotated files kept before the oldest is removed.
    pub max_files: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_prefix: "papertrail".to_string(),
            max_files: 14,
        }
    }
}

impl Settings {
    pub fn from_value(value: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(value.clone())
            .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))
    }

    pub fn embedding_base_url(&self) -> &str {
        self.embedding
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(&self.llm.base_url)
    }

    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
            .filter(|key| !key.trim().is_empty())
    }

    /// Relative upload directories are resolved against the data directory.
    pub fn upload_dir(&self, paths: &AppPaths) -> PathBuf {
        match self.storage.upload_dir.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let candidate = PathBuf::from(raw);
                if candidate.is_absolute() {
                    candidate
                } else {
                    paths.user_data_dir.join(candidate)
                }
            }
            _ => paths.upload_dir.clone(),
        }
    }
}
