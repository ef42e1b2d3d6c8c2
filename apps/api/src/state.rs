use std::sync::Arc;

use crate::config::Config;
use crate::llm_client::Generator;
use crate::prompts::PromptLoader;
use crate::store::RunStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// The in-memory run table — the only shared mutable state in the service.
    pub store: RunStore,
    /// Generation capability behind a trait so tests can inject a mock.
    pub llm: Arc<dyn Generator>,
    pub prompts: PromptLoader,
    pub config: Config,
}
