mod config;
mod errors;
mod llm_client;
mod models;
mod pipeline;
mod prompts;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::{Generator, OllamaClient};
use crate::prompts::PromptLoader;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::RunStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
            EnvFilter::new(format!("{}={}", crate_name, &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Coach API v{}", env!("CARGO_PKG_VERSION"));

    // Prompt templates — a bad PROMPTS_DIR should fail startup, not the first run
    let prompts = PromptLoader::new(config.prompts_dir.clone())?;
    info!("Prompt loader initialized ({})", config.prompts_dir.display());

    // Generation backend
    let llm: Arc<dyn Generator> = Arc::new(OllamaClient::new(config.ollama_base_url.clone()));
    info!("Ollama client initialized ({})", config.ollama_base_url);

    // In-memory run table; state is process-lifetime only
    let store = RunStore::new();

    let state = AppState {
        store,
        llm,
        prompts,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
