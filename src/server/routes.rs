//! Axum route handlers.
//!
//! # Routes
//!
//! - `GET  /`                 — liveness probe, returns `"ok"`, no auth
//! - `POST /chat/completions` — bearer-authenticated RAG completion
//!
//! Request-level failures never crash the service: auth and validation
//! problems map to 401/400 with an `{"error": ...}` body, and upstream
//! provider failures map to a generic 5xx body while the full detail goes
//! to the log only.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::QueryError;
use crate::query::QueryEngine;

/// Shared application state.
///
/// The engine (and the index inside it) is read-only after startup, so
/// concurrent requests share it through `Arc` without synchronization.
#[derive(Clone)]
pub struct AppState {
    /// The query engine every request dispatches to.
    pub engine: Arc<QueryEngine>,
    /// Bearer secret required on the completion route.
    pub api_key: String,
}

impl AppState {
    pub fn new(engine: Arc<QueryEngine>, api_key: impl Into<String>) -> Self {
        Self {
            engine,
            api_key: api_key.into(),
        }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/chat/completions", post(completions_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / — liveness probe. No auth; returns the JSON string `"ok"`.
async fn health_handler() -> impl IntoResponse {
    Json("ok")
}

/// POST /chat/completions — answer a prompt against the index.
///
/// Request:  `{"prompt": string}` with `Authorization: Bearer <API_KEY>`.
/// Response: `200 {"content": string}` on success.
async fn completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    // Auth first: an unauthenticated caller learns nothing about the body.
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if authorization != Some(format!("Bearer {}", state.api_key).as_str()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid or missing bearer token"})),
        ));
    }

    let parsed: Value = serde_json::from_slice(&body).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "request body must be JSON"})),
        )
    })?;
    let prompt = parsed
        .get("prompt")
        .and_then(|p| p.as_str())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "'prompt' is required and must be a string"})),
            )
        })?;

    tracing::info!(chars = prompt.len(), "completion requested");

    match state.engine.query(prompt).await {
        Ok(response) => {
            tracing::info!(
                sources = response.sources.len(),
                "completion synthesized"
            );
            for source in &response.sources {
                tracing::debug!(
                    source = %source.source,
                    score = source.score,
                    "context chunk used"
                );
            }
            Ok(Json(serde_json::json!({"content": response.content})))
        }
        Err(error) => Err(map_query_error(error)),
    }
}

/// Map engine failures to stable, detail-free response bodies.
fn map_query_error(error: QueryError) -> (StatusCode, Json<Value>) {
    match error {
        QueryError::UpstreamEmbedding(e) => {
            tracing::error!(error = %e, "embedding provider failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "upstream provider error"})),
            )
        }
        QueryError::UpstreamLlm(e) => {
            tracing::error!(error = %e, "chat provider failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "upstream provider error"})),
            )
        }
        QueryError::PromptTooLarge => {
            tracing::error!("prompt exceeded the input token budget");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "failed to generate completion"})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::embeddings::testing::CountingEmbedder;
    use crate::index::{DirectoryReader, NodeParser, VectorIndex};
    use crate::llm::testing::{FailingChat, RecordingChat};
    use crate::query::PromptHelper;

    async fn test_state(llm: Arc<dyn crate::llm::ChatModel>) -> AppState {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "cats purr and chase mice").unwrap();
        std::fs::write(dir.path().join("b.txt"), "rust is memory safe").unwrap();
        let documents = DirectoryReader::load(dir.path()).unwrap();

        let embedder = Arc::new(CountingEmbedder::default());
        let parser = NodeParser::new(2048, 20);
        let index = Arc::new(
            VectorIndex::build(&documents, &parser, embedder.as_ref())
                .await
                .unwrap(),
        );

        let engine = QueryEngine::new(
            index,
            embedder,
            llm,
            PromptHelper::new(4096, 256),
            2,
        )
        .unwrap();
        AppState::new(Arc::new(engine), "test-api-key")
    }

    fn completion_request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/chat/completions")
            .header("Content-Type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok_without_auth() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, Value::String("ok".to_string()));
    }

    #[tokio::test]
    async fn health_ignores_bogus_auth_headers() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let request = Request::builder()
            .uri("/")
            .header("Authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_authorization_is_401() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(None, r#"{"prompt": "test"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn wrong_bearer_token_is_401() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(
                Some("Bearer not-the-key"),
                r#"{"prompt": "test"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_request_returns_content_string() {
        let state = test_state(Arc::new(RecordingChat::with_answer("mice, mostly"))).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(
                Some("Bearer test-api-key"),
                r#"{"prompt": "test"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["content"], "mice, mostly");
    }

    #[tokio::test]
    async fn missing_prompt_field_is_400() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(Some("Bearer test-api-key"), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn non_json_body_is_400() {
        let state = test_state(Arc::new(RecordingChat::default())).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(Some("Bearer test-api-key"), "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_failure_is_502_with_generic_body() {
        let state = test_state(Arc::new(FailingChat)).await;
        let app = app_router(state);

        let response = app
            .oneshot(completion_request(
                Some("Bearer test-api-key"),
                r#"{"prompt": "test"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"], "upstream provider error");
    }
}
