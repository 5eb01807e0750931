use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "jwt",
    "access_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 4] = [
    "max_tokens",
    "access_token_minutes",
    "refresh_token_days",
    "tokens",
];

/// Environment variables that override config keys. Values are parsed as
/// YAML scalars so `PORT=9000` lands as a number.
const ENV_OVERRIDES: [(&str, &[&str]); 6] = [
    ("OPENAI_KEY", &["llm", "api_key"]),
    ("JWT_KEY", &["auth", "jwt_secret"]),
    ("UPLOAD_DIR", &["storage", "upload_dir"]),
    ("PORT", &["server", "port"]),
    ("HOST", &["server", "host"]),
    ("PAPERTRAIL_LLM_BASE_URL", &["llm", "base_url"]),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("PAPERTRAIL_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Merged public config and secrets, with environment overrides applied.
    pub fn load_config(&self) -> Result<Value, ApiError> {
        let public_config = load_yaml_file(&self.config_path())?;
        let secrets_config = load_yaml_file(&self.secrets_path())?;
        let mut merged = deep_merge(&public_config, &secrets_config);
        apply_env_overrides(&mut merged, |key| env::var(key).ok());
        validate_config(&merged)?;
        Ok(merged)
    }

    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let config = self.load_config()?;
        tracing::debug!(
            "Effective configuration: {}",
            redact_sensitive_values(&config)
        );
        Settings::from_value(&config)
    }
}

fn load_yaml_file(path: &Path) -> Result<Value, ApiError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        ApiError::internal(format!("Failed to read {}: {}", path.display(), e))
    })?;
    match serde_yaml::from_str::<Value>(&contents) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(_) => Err(ApiError::BadRequest(format!(
            "Invalid config in {}: expected a mapping at the root",
            path.display()
        ))),
        Err(e) => Err(ApiError::BadRequest(format!(
            "Invalid YAML in {}: {}",
            path.display(),
            e
        ))),
    }
}

fn apply_env_overrides<F>(config: &mut Value, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for (var, path) in ENV_OVERRIDES {
        let Some(raw) = lookup(var) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        let value = match serde_yaml::from_str::<Value>(&raw) {
            Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
            _ => Value::String(raw),
        };
        ensure_object_path(config, path, value);
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "a": 1,
            "b": { "c": 2, "d": 3 },
            "arr": [1, 2]
        });
        let override_value = json!({
            "b": { "c": 99 },
            "arr": [3],
            "e": "x"
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "a": 1,
                "b": { "c": 99, "d": 3 },
                "arr": [3],
                "e": "x"
            })
        );
    }

    #[test]
    fn env_overrides_create_sections_and_parse_numbers() {
        let mut config = json!({ "server": { "host": "0.0.0.0" } });

        apply_env_overrides(&mut config, |key| match key {
            "PORT" => Some("9001".to_string()),
            "OPENAI_KEY" => Some("sk-test".to_string()),
            "JWT_KEY" => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(config["server"]["port"], json!(9001));
        assert_eq!(config["server"]["host"], json!("0.0.0.0"));
        assert_eq!(config["llm"]["api_key"], json!("sk-test"));
        assert!(config.get("auth").is_none());
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "llm": { "api_key": "secret", "chat_model": "gpt" },
            "auth": {
                "jwt_secret": "shh",
                "access_token_minutes": 30
            },
            "items": [
                { "password": "pw" }
            ]
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "llm": { "api_key": "****", "chat_model": "gpt" },
                "auth": {
                    "jwt_secret": "****",
                    "access_token_minutes": 30
                },
                "items": [
                    { "password": "****" }
                ]
            })
        );
    }

    #[test]
    fn load_config_merges_secrets_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::from_data_dir(dir.path()));
        fs::write(
            dir.path().join("config.yml"),
            "rag:\n  top_k: 4\nllm:\n  chat_model: local-model\n",
        )
        .unwrap();
        fs::write(&paths.secrets_path, "llm:\n  api_key: from-secrets\n").unwrap();

        let service = ConfigService::new(paths);
        let config = service.load_config().unwrap();

        assert_eq!(config["rag"]["top_k"], json!(4));
        assert_eq!(config["llm"]["chat_model"], json!("local-model"));
        assert!(config["llm"]["api_key"].is_string());
    }

    #[test]
    fn load_config_rejects_non_mapping_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "- just\n- a list\n").unwrap();

        assert!(matches!(
            load_yaml_file(&path),
            Err(ApiError::BadRequest(_))
        ));
    }
}
