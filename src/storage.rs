use crate::models::{ChatSession, Role};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

// Single namespaced key under which the whole session list is serialized.
const STORAGE_KEY: &str = "appdraft-chat-sessions";

// Keep only the most recent 50 sessions; the tail is discarded on save.
const MAX_SESSIONS: usize = 50;

pub const DEFAULT_TITLE: &str = "New Chat";

// Display titles derived from a message are truncated to this many chars.
const TITLE_MAX_CHARS: usize = 50;

/// A key-value substrate the session list is read and written through,
/// wholesale. Implementations decide where (or whether) the bytes land.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// Volatile backend, used by tests and by hosts without a persistence
/// context that still want working session state for the process lifetime.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Session storage mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Session storage mutex poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// File-backed backend: one JSON file per key inside a data directory.
/// Writes go through a temp file and a rename so a crash mid-write never
/// leaves a torn session list behind.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(data))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let final_path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&tmp_path, value)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("Failed to replace {}", final_path.display()))?;
        Ok(())
    }
}

/// No-op backend for hosts with no persistence context at all: reads come
/// back empty, writes vanish. The store behaves identically either way.
pub struct NullBackend;

impl StorageBackend for NullBackend {
    fn read(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn write(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}

/// Bounded, ordered collection of chat sessions kept in a key-value
/// substrate. Reads never raise: failures are logged and degrade to an
/// empty list. Writes are best-effort for the same reason; this is a local
/// convenience cache, not a system of record.
pub struct SessionStore {
    backend: Box<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// All stored sessions, most recently inserted first. Existing sessions
    /// keep their stored position when updated in place.
    pub fn list(&self) -> Vec<ChatSession> {
        let raw = match self.backend.read(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::error!("Failed to load chat sessions: {e:?}");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<ChatSession>>(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::error!("Stored chat sessions are not valid JSON, ignoring: {e}");
                Vec::new()
            }
        }
    }

    /// Upserts a session: same id replaces in place, a new id is inserted at
    /// the front. The list is then capped at `MAX_SESSIONS`, evicting from
    /// the tail (oldest inserted first).
    pub fn save(&self, session: &ChatSession) {
        let mut sessions = self.list();

        match sessions.iter().position(|s| s.id == session.id) {
            Some(index) => sessions[index] = session.clone(),
            None => sessions.insert(0, session.clone()),
        }
        sessions.truncate(MAX_SESSIONS);

        if let Err(e) = self.persist(&sessions) {
            log::error!("Failed to save chat session {}: {e:?}", session.id);
        }
    }

    /// Removes the session with the given id. Absent ids are a silent no-op.
    pub fn delete(&self, session_id: &str) {
        let mut sessions = self.list();
        sessions.retain(|s| s.id != session_id);

        if let Err(e) = self.persist(&sessions) {
            log::error!("Failed to delete chat session {session_id}: {e:?}");
        }
    }

    /// Case-insensitive substring search over session titles and message
    /// contents, in `list()` order. A blank query means "no search" and
    /// returns nothing.
    pub fn search(&self, query: &str) -> Vec<ChatSession> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();

        self.list()
            .into_iter()
            .filter(|session| {
                session.title.to_lowercase().contains(&needle)
                    || session
                        .messages
                        .iter()
                        .any(|m| m.content.to_lowercase().contains(&needle))
            })
            .collect()
    }

    fn persist(&self, sessions: &[ChatSession]) -> Result<()> {
        let raw = serde_json::to_string(sessions).context("Failed to serialize sessions")?;
        self.backend.write(STORAGE_KEY, &raw)
    }
}

/// Title shown for a session in history and search surfaces. Non-default
/// titles are kept verbatim; a session still on the default placeholder is
/// displayed as its first user message, truncated to 50 chars with "...".
pub fn display_title(session: &ChatSession) -> String {
    if session.title != DEFAULT_TITLE {
        return session.title.clone();
    }
    match session.messages.iter().find(|m| m.role == Role::User) {
        Some(first) => derive_title(&first.content),
        None => DEFAULT_TITLE.to_string(),
    }
}

/// Truncation rule for titles derived from message content.
pub fn derive_title(content: &str) -> String {
    let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
    if content.chars().count() > TITLE_MAX_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;

    fn store() -> SessionStore {
        SessionStore::new(Box::new(MemoryBackend::default()))
    }

    fn session_with_message(content: &str) -> ChatSession {
        let mut session = ChatSession::new();
        session
            .messages
            .push(ChatMessage::new(Role::User, content));
        session
    }

    #[test]
    fn list_is_empty_for_a_fresh_store() {
        assert!(store().list().is_empty());
    }

    #[test]
    fn new_sessions_are_inserted_at_the_front() {
        let store = store();
        let first = session_with_message("first");
        let second = session_with_message("second");

        store.save(&first);
        store.save(&second);

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn saving_an_existing_session_updates_in_place() {
        let store = store();
        let older = session_with_message("older");
        let mut target = session_with_message("target");
        store.save(&target);
        store.save(&older);

        target
            .messages
            .push(ChatMessage::new(Role::Assistant, "reply"));
        store.save(&target);

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        // Updated session keeps its stored position and carries the new message.
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, target.id);
        assert_eq!(listed[1].messages.len(), 2);
    }

    #[test]
    fn the_51st_session_evicts_the_oldest() {
        let store = store();
        let oldest = session_with_message("session 0");
        store.save(&oldest);
        for i in 1..51 {
            store.save(&session_with_message(&format!("session {i}")));
        }

        let listed = store.list();
        assert_eq!(listed.len(), 50);
        assert!(listed.iter().all(|s| s.id != oldest.id));
        assert_eq!(listed[49].messages[0].content, "session 1");
    }

    #[test]
    fn delete_removes_only_the_matching_session() {
        let store = store();
        let keep = session_with_message("keep");
        let drop = session_with_message("drop");
        store.save(&keep);
        store.save(&drop);

        store.delete(&drop.id);
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, keep.id);

        // Deleting an unknown id is a no-op.
        store.delete("not-a-session");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn search_matches_titles_and_message_content() {
        let store = store();
        let mut titled = ChatSession::new();
        titled.title = "Hello planning".to_string();
        store.save(&titled);
        store.save(&session_with_message("say HELLO to the team"));
        store.save(&session_with_message("unrelated"));

        let hits = store.search("hello");
        assert_eq!(hits.len(), 2);

        assert!(store.search("").is_empty());
        assert!(store.search("   ").is_empty());
    }

    #[test]
    fn corrupt_stored_data_degrades_to_empty() {
        let backend = MemoryBackend::default();
        backend.write(STORAGE_KEY, "not json at all").unwrap();
        let store = SessionStore::new(Box::new(backend));
        assert!(store.list().is_empty());
    }

    #[test]
    fn null_backend_reads_empty_and_swallows_writes() {
        let store = SessionStore::new(Box::new(NullBackend));
        store.save(&session_with_message("gone"));
        assert!(store.list().is_empty());
    }

    #[test]
    fn file_backend_round_trips_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Box::new(FileBackend::new(dir.path())));
        let session = session_with_message("persist me");
        store.save(&session);

        let reopened = SessionStore::new(Box::new(FileBackend::new(dir.path())));
        let listed = reopened.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
    }

    #[test]
    fn display_title_prefers_saved_titles_and_truncates_derived_ones() {
        let mut named = ChatSession::new();
        named.title = "Project kickoff".to_string();
        assert_eq!(display_title(&named), "Project kickoff");

        let short = session_with_message("Build me a timer app");
        assert_eq!(display_title(&short), "Build me a timer app");

        let long_content = "x".repeat(60);
        let long = session_with_message(&long_content);
        let title = display_title(&long);
        assert_eq!(title, format!("{}...", "x".repeat(50)));

        let empty = ChatSession::new();
        assert_eq!(display_title(&empty), DEFAULT_TITLE);
    }
}
