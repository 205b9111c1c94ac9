//! ragserve HTTP server binary.
//!
//! Startup is strictly serial: secrets, then configuration, then index
//! build/load, then the listener. The service never accepts traffic before
//! the index is fully built.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 80)
//! - `API_KEY` — bearer secret for the completion route
//! - `DATA_DIR` / `CACHE_DIR` — document and index directories
//! - `OPENAI_API_KEY` — provider credential
//! - `SSM_PARAMETER_NAME` — optional SSM parameter holding a dotenv blob
//!   injected into the environment before configuration is read
//! - `RUST_LOG` — tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use ragserve::embeddings::OpenAiEmbedding;
use ragserve::llm::OpenAiChat;
use ragserve::query::{PromptHelper, QueryEngine};
use ragserve::secrets::{self, SsmParameterStore};
use ragserve::server::{app_router, AppState};
use ragserve::{ServiceConfig, VectorIndex};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ragserve=debug".into()),
        )
        .init();

    // Secrets first: everything after this reads environment-derived config.
    if let Ok(parameter_name) = std::env::var("SSM_PARAMETER_NAME") {
        let store = match SsmParameterStore::from_env() {
            Ok(store) => store,
            Err(e) => {
                tracing::error!(error = %e, "cannot construct parameter store client");
                std::process::exit(1);
            }
        };
        if let Err(e) = secrets::bootstrap(&store, &parameter_name).await {
            tracing::error!(error = %e, "secret bootstrap failed");
            std::process::exit(1);
        }
    }

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let embedder = Arc::new(OpenAiEmbedding::new(
        &config.embed_model,
        &config.openai_api_key,
        config.request_timeout_secs,
    ));
    let llm = Arc::new(OpenAiChat::new(
        &config.chat_model,
        &config.openai_api_key,
        config.num_output_tokens,
        config.request_timeout_secs,
    ));

    // Build or reload the index before the listener exists.
    let index = match VectorIndex::load_or_build(&config, embedder.as_ref()).await {
        Ok(index) => Arc::new(index),
        Err(e) => {
            tracing::error!(error = %e, "index initialization failed");
            std::process::exit(1);
        }
    };

    let helper = PromptHelper::new(config.max_input_tokens, config.num_output_tokens);
    let engine = match QueryEngine::new(
        index,
        embedder,
        llm,
        helper,
        config.similarity_top_k,
    ) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "query engine initialization failed");
            std::process::exit(1);
        }
    };

    let state = AppState::new(engine, config.api_key.clone());
    let app = app_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(version = ragserve::VERSION, addr = %bind_addr, "ragserve starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /                 — liveness probe");
    tracing::info!("  POST /chat/completions — RAG completion (bearer auth)");

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server failed");
        std::process::exit(1);
    }
}
