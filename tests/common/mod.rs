#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use papertrail_backend::core::config::{AppPaths, Settings};
use papertrail_backend::core::errors::ApiError;
use papertrail_backend::llm::{ChatRequest, LlmProvider};
use papertrail_backend::server;
use papertrail_backend::state::AppState;

const KEYWORDS: [&str; 4] = ["rust", "python", "tokio", "cooking"];

/// Deterministic stand-in for the OpenAI-compatible endpoint. Embeddings are
/// keyword indicator vectors; answers name the last prompt line.
pub struct FakeProvider;

#[async_trait]
impl LlmProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
        let prompt = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(format!("fake answer ({} prompt messages): {}", request.messages.len(), prompt))
    }

    async fn stream_chat(
        &self,
        _request: ChatRequest,
        _model_id: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for piece in ["streamed ", "answer"] {
                if tx.send(Ok(piece.to_string())).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                let mut vector: Vec<f32> = KEYWORDS
                    .iter()
                    .map(|keyword| if text.contains(keyword) { 1.0 } else { 0.0 })
                    .collect();
                vector.push(0.05);
                vector
            })
            .collect())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub paths: AppPaths,
    _dir: tempfile::TempDir,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Settings)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = AppPaths::from_data_dir(dir.path());

    let mut settings = Settings::default();
    settings.auth.jwt_secret = Some("integration-test-secret-0123456789abcdef".to_string());
    settings.rag.top_k = 2;
    configure(&mut settings);

    let provider: Arc<dyn LlmProvider> = Arc::new(FakeProvider);
    let state = AppState::build(&paths, settings, provider.clone(), provider)
        .await
        .expect("state");

    TestApp {
        router: server::router(state.clone()),
        state,
        paths,
        _dir: dir,
    }
}

/// One `files` part per `(filename, bytes)`.
pub fn multipart_upload(token: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    let boundary = "papertrail-boundary";
    let mut body = Vec::new();
    for (filename, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\
Content-Type: application/octet-stream\r\n\r\n",
                boundary, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .expect("request")
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        TestResponse {
            status,
            headers,
            text: String::from_utf8_lossy(&bytes).to_string(),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> TestResponse {
        self.send(json_request(
            "POST",
            "/auth/register",
            None,
            serde_json::json!({ "username": username, "password": password }),
        ))
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> TestResponse {
        let body = format!("username={}&password={}", username, password);
        self.send(
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .expect("request"),
        )
        .await
    }

    /// Registers and logs in, returning the access token.
    pub async fn signed_in(&self, username: &str) -> String {
        assert_eq!(self.register(username, "password123").await.status, StatusCode::CREATED);
        let response = self.login(username, "password123").await;
        assert_eq!(response.status, StatusCode::OK);
        response.json()["access_token"]
            .as_str()
            .expect("access token")
            .to_string()
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn authed_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .expect("request")
}

/// `name=value` of the refresh cookie from a login response.
pub fn refresh_cookie_pair(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("refresh_token="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}
