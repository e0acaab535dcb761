use crate::api::LlmApi;
use crate::config::AppConfig;
use crate::sandbox::SandboxClient;
use crate::storage::SessionStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// Core application state shared by the chat and generation services.
#[derive(Clone)]
pub struct AppState {
    // The store is wrapped in a Mutex so the read-modify-write save cycle
    // is never interleaved between two async callers.
    pub storage: Arc<Mutex<SessionStore>>,
    pub llm: Arc<dyn LlmApi>,
    pub sandbox: Arc<SandboxClient>,
    pub config: AppConfig,
    // Busy flags keyed by session id (or the generation widget key); a set
    // flag rejects overlapping submissions from the same input control.
    pub busy: Arc<DashMap<String, bool>>,
}

impl AppState {
    pub fn new(
        store: SessionStore,
        llm: Arc<dyn LlmApi>,
        sandbox: SandboxClient,
        config: AppConfig,
    ) -> Self {
        Self {
            storage: Arc::new(Mutex::new(store)),
            llm,
            sandbox: Arc::new(sandbox),
            config,
            busy: Arc::new(DashMap::new()),
        }
    }
}
