use super::models::{Message, Session, SessionUpdate};
use super::storage::{CHAT_STATE_KEY, LocalStorage};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Snapshot written under `audio-chat-storage`.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ChatState {
    #[serde(default)]
    sessions: Vec<Session>,
    #[serde(default)]
    active_session_id: Option<String>,
}

/// Process-wide container for chat sessions.
///
/// Every mutation bumps a revision counter visible through [`SessionStore::subscribe`]
/// and, when backed by [`LocalStorage`], rewrites the persisted snapshot.
/// Operations never fail: a failed write is logged and the in-memory state stays
/// authoritative.
pub struct SessionStore {
    sessions: Vec<Session>,
    active_session_id: Option<String>,
    storage: Option<LocalStorage>,
    revision: watch::Sender<u64>,
}

impl SessionStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::from_parts(ChatState::default(), None)
    }

    pub fn load(storage: LocalStorage) -> Self {
        let state = match storage.get::<ChatState>(CHAT_STATE_KEY) {
            Ok(Some(state)) => {
                info!("Loaded {} sessions", state.sessions.len());
                state
            }
            Ok(None) => ChatState::default(),
            Err(e) => {
                warn!("Failed to read saved chat state, starting empty: {}", e);
                ChatState::default()
            }
        };

        Self::from_parts(state, Some(storage))
    }

    fn from_parts(state: ChatState, storage: Option<LocalStorage>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            sessions: state.sessions,
            active_session_id: state.active_session_id,
            storage,
            revision,
        }
    }

    /// Receiver that observes the store's revision after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get_session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_session_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session_id
            .as_deref()
            .and_then(|id| self.get_session(id))
    }

    /// Create a session, make it active and return its id.
    pub fn create_session(&mut self, title: &str) -> String {
        let session = Session::new(title);
        let id = session.id.clone();
        debug!("Created session {} ({})", id, title);

        self.sessions.insert(0, session);
        self.active_session_id = Some(id.clone());
        self.commit();
        id
    }

    /// Returns false when no session has that id.
    pub fn set_active_session(&mut self, id: &str) -> bool {
        if self.get_session(id).is_none() {
            return false;
        }
        self.active_session_id = Some(id.to_string());
        self.commit();
        true
    }

    pub fn update_session(&mut self, id: &str, update: SessionUpdate) -> bool {
        let Some(session) = self.get_session_mut(id) else {
            return false;
        };

        if let Some(title) = update.title {
            session.title = title;
        }
        if let Some(messages) = update.messages {
            session.messages = unique_messages(messages);
        }
        if let Some(is_archived) = update.is_archived {
            session.is_archived = is_archived;
        }
        if let Some(metadata) = update.metadata {
            session.metadata = metadata;
        }
        session.updated_at = Some(Utc::now());

        self.commit();
        true
    }

    pub fn delete_session(&mut self, id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }

        if self.active_session_id.as_deref() == Some(id) {
            self.active_session_id = None;
        }
        self.commit();
        true
    }

    /// Flip the archive flag. Returns the new value.
    pub fn archive_session(&mut self, id: &str) -> Option<bool> {
        let archived = !self.get_session(id)?.is_archived;
        self.update_session(
            id,
            SessionUpdate {
                is_archived: Some(archived),
                ..Default::default()
            },
        );
        Some(archived)
    }

    /// Append `message`. A message whose id is already present replaces the old one in place.
    pub fn add_message(&mut self, session_id: &str, message: Message) -> bool {
        let Some(session) = self.get_session_mut(session_id) else {
            return false;
        };

        match session.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => session.messages.push(message),
        }
        session.updated_at = Some(Utc::now());

        self.commit();
        true
    }

    /// Swap the text of a placeholder message once the real answer is known.
    pub fn replace_message(&mut self, session_id: &str, message_id: &str, text: &str) -> bool {
        let Some(session) = self.get_session_mut(session_id) else {
            return false;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };

        message.text = text.to_string();
        message.timestamp = Some(Utc::now());
        session.updated_at = Some(Utc::now());

        self.commit();
        true
    }

    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.active_session_id = None;
        self.commit();
    }

    fn commit(&mut self) {
        self.revision.send_modify(|rev| *rev += 1);

        if let Some(storage) = &self.storage {
            let state = ChatState {
                sessions: self.sessions.clone(),
                active_session_id: self.active_session_id.clone(),
            };
            if let Err(e) = storage.set(CHAT_STATE_KEY, &state) {
                warn!("Failed to persist chat state: {}", e);
            }
        }
    }
}

/// Collapse repeated ids: the last copy wins and keeps the first copy's position.
fn unique_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut unique: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match unique.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => unique.push(message),
        }
    }
    unique
}
