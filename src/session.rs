//! Conversation session identity for generation continuity.
//!
//! The generation transport keeps per-conversation context keyed by a
//! `(user, session)` pair. The controller owns one pair for its lifetime and
//! re-asserts it before every generation call; [`SessionStore::get_or_create`]
//! is idempotent and atomic per key, so a session dropped by the transport is
//! simply recreated.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Identity and bookkeeping for one conversation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSession {
    pub user_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub turns: u32,
}

/// How a session lookup resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInit {
    /// A brand new session was created.
    Fresh,
    /// An existing session was found and reused.
    Existing,
}

type SessionKey = (String, String);

/// In-memory session registry.
///
/// Distinct keys are independent; operations on one key are atomic relative
/// to each other (single mutex, no await points while held).
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<FxHashMap<SessionKey, ConversationSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `(user_id, session_id)`, creating it if
    /// missing. Calling twice with the same pair returns the same session.
    pub fn get_or_create(&self, user_id: &str, session_id: &str) -> (ConversationSession, SessionInit) {
        let mut sessions = self.sessions.lock();
        let key = (user_id.to_string(), session_id.to_string());
        match sessions.get(&key) {
            Some(existing) => (existing.clone(), SessionInit::Existing),
            None => {
                let session = ConversationSession {
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    created_at: Utc::now(),
                    turns: 0,
                };
                sessions.insert(key, session.clone());
                (session, SessionInit::Fresh)
            }
        }
    }

    /// Record one completed generation turn against a session.
    pub fn record_turn(&self, user_id: &str, session_id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(&(user_id.to_string(), session_id.to_string())) {
            session.turns += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
