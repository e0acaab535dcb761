use crate::config;
use crate::generator::CodeGenerator;
use crate::models::{ChatMessage, ChatSession, FileMap, Role, SandboxState};
use crate::state::AppState;
use crate::storage;
use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. You are witty, informative, \
    and slightly rebellious in your responses. Keep your answers helpful but with a touch \
    of humor when appropriate.";

// Shown instead of a reply when the stream fails to start or dies partway
// through. Partial content from a failed stream is discarded.
const STREAM_FAILURE_MESSAGE: &str =
    "I'm having trouble generating a response right now. Please try again.";

// Busy-flag key for the single generation widget.
const GENERATION_BUSY_KEY: &str = "generation";

/// Chat pipeline orchestration: appends the user message, derives the title
/// on the first exchange, consumes the assistant delta stream, and persists
/// the session after each append.
pub struct ChatService {
    state: AppState,
}

impl ChatService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Sends one user message and appends the streamed assistant reply.
    /// `on_delta` is invoked for every fragment as it arrives, in order.
    /// Rejects the call if a request is already in flight for this session.
    pub async fn send_message(
        &self,
        session: &mut ChatSession,
        content: String,
        on_delta: impl FnMut(&str) + Send,
    ) -> Result<ChatMessage> {
        self.claim(&session.id)?;
        let result = self.run_exchange(session, content, on_delta).await;
        self.state.busy.remove(&session.id);
        result
    }

    /// Re-runs the model over the history preceding the last assistant
    /// message and replaces that message in place. Surrounding messages keep
    /// their positions.
    pub async fn regenerate(
        &self,
        session: &mut ChatSession,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> Result<ChatMessage> {
        let Some(index) = session
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Err(anyhow::anyhow!(
                "No previous assistant message found to regenerate."
            ));
        };

        self.claim(&session.id)?;
        let history = session.messages[..index].to_vec();
        let content = self.stream_reply(&history, &mut on_delta).await;
        self.state.busy.remove(&session.id);

        let replacement = ChatMessage::new(Role::Assistant, content);
        log::info!(
            "Replacing assistant message at index {index} in session {}",
            session.id
        );
        session.messages[index] = replacement.clone();
        self.save(session).await;

        Ok(replacement)
    }

    async fn run_exchange(
        &self,
        session: &mut ChatSession,
        content: String,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> Result<ChatMessage> {
        let user_message = ChatMessage::new(Role::User, content);
        session.messages.push(user_message);

        // First user message names a still-untitled session; once set, the
        // title never reverts.
        if session.title == storage::DEFAULT_TITLE {
            session.title = storage::display_title(session);
        }
        self.save(session).await;

        let reply = self.stream_reply(&session.messages, &mut on_delta).await;
        let assistant_message = ChatMessage::new(Role::Assistant, reply);
        session.messages.push(assistant_message.clone());
        self.save(session).await;

        Ok(assistant_message)
    }

    // Consumes the delta stream into the final reply text. Any failure,
    // at start or partway, yields the fallback message instead.
    async fn stream_reply(
        &self,
        history: &[ChatMessage],
        on_delta: &mut (impl FnMut(&str) + Send),
    ) -> String {
        let api_key = match config::resolve_api_key(
            "llm",
            self.state.config.llm.api_key_ref.as_deref(),
        ) {
            Ok(key) => key,
            Err(e) => {
                log::error!("Failed to resolve LLM API key: {e:?}");
                return STREAM_FAILURE_MESSAGE.to_string();
            }
        };

        let stream_result = self
            .state
            .llm
            .stream_chat(&self.state.config.llm, &api_key, SYSTEM_PROMPT, history)
            .await;

        let mut delta_stream = match stream_result {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to initiate chat stream: {e:?}");
                return STREAM_FAILURE_MESSAGE.to_string();
            }
        };

        let mut full_content = String::new();
        while let Some(delta_result) = delta_stream.next().await {
            match delta_result {
                Ok(delta) => {
                    on_delta(&delta);
                    full_content.push_str(&delta);
                }
                Err(e) => {
                    log::error!("Chat stream failed partway through: {e:?}");
                    return STREAM_FAILURE_MESSAGE.to_string();
                }
            }
        }

        full_content
    }

    fn claim(&self, key: &str) -> Result<()> {
        if self.state.busy.contains_key(key) {
            return Err(anyhow::anyhow!(
                "A request is already in flight; wait for it to finish."
            ));
        }
        self.state.busy.insert(key.to_string(), true);
        Ok(())
    }

    async fn save(&self, session: &mut ChatSession) {
        session.updated_at = Utc::now();
        let store = self.state.storage.lock().await;
        store.save(session);
    }
}

/// Result of one generation round: the explanation and changed-files diff
/// for the user, the full file set and sandbox state for the preview.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub explanation: String,
    pub files: FileMap,
    pub changed_files: Option<FileMap>,
    pub sandbox: SandboxState,
}

/// App-generation pipeline orchestration: prompt -> completion -> parsed
/// file set -> sandbox publish. The full merged set always drives the
/// sandbox; the changed subset only drives what the user is shown.
pub struct GenerationService {
    state: AppState,
    generator: CodeGenerator,
}

impl GenerationService {
    pub fn new(state: AppState) -> Self {
        let generator = CodeGenerator::new(state.llm.clone(), state.config.llm.clone());
        Self { state, generator }
    }

    pub async fn generate_app(
        &self,
        prompt: &str,
        existing_files: &FileMap,
        existing_sandbox_id: Option<&str>,
    ) -> Result<GenerationOutcome> {
        if self.state.busy.contains_key(GENERATION_BUSY_KEY) {
            return Err(anyhow::anyhow!(
                "A generation request is already in flight; wait for it to finish."
            ));
        }
        self.state.busy.insert(GENERATION_BUSY_KEY.to_string(), true);
        let result = self
            .run_generation(prompt, existing_files, existing_sandbox_id)
            .await;
        self.state.busy.remove(GENERATION_BUSY_KEY);
        result
    }

    async fn run_generation(
        &self,
        prompt: &str,
        existing_files: &FileMap,
        existing_sandbox_id: Option<&str>,
    ) -> Result<GenerationOutcome> {
        let llm_key =
            config::resolve_api_key("llm", self.state.config.llm.api_key_ref.as_deref())?;
        let generated = self
            .generator
            .generate(&llm_key, prompt, existing_files)
            .await?;

        let sandbox_key = config::resolve_api_key(
            "sandbox",
            self.state.config.sandbox.api_key_ref.as_deref(),
        )?;
        let sandbox = self
            .state
            .sandbox
            .publish(&sandbox_key, &generated.files, existing_sandbox_id)
            .await?;

        Ok(GenerationOutcome {
            explanation: generated.explanation,
            files: generated.files,
            changed_files: generated.changed_files,
            sandbox,
        })
    }
}
