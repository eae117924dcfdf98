//! Session Manager: in-memory lifecycle tracking for gateway-driven sessions.
//!
//! Grounded on the teacher's `SessionRouter` (`RwLock<HashMap<_, _>>` session
//! store), generalized from channel-keyed conversation routing to the
//! gateway's create/touch/end/evict lifecycle contract.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A session is considered idle once this long has passed without a touch,
/// for display purposes only — it stays tracked until explicitly ended or
/// evicted.
const IDLE_THRESHOLD_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Ended,
}

/// Parameters for [`SessionManager::create_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub system_prompt: Option<String>,
}

/// A tracked session's lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Status computed from elapsed idle time; a record only leaves this
    /// table via [`SessionManager::end_session`] or eviction, so `Ended` is
    /// never observed here.
    pub fn status(&self) -> SessionStatus {
        let idle = Utc::now().signed_duration_since(self.last_active_at);
        if idle > Duration::seconds(IDLE_THRESHOLD_SECS) {
            SessionStatus::Idle
        } else {
            SessionStatus::Active
        }
    }
}

/// Tracks every session the gateway has created, keyed by session id.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_session(&self, cfg: SessionConfig) -> SessionRecord {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            channel_id: cfg.channel_id,
            user_id: cfg.user_id,
            system_prompt: cfg.system_prompt,
            created_at: now,
            last_active_at: now,
        };
        self.sessions
            .write()
            .expect("session manager lock poisoned")
            .insert(record.session_id.clone(), record.clone());
        record
    }

    /// Look up `id`, creating it with default fields if absent — used by the
    /// WebSocket route, which addresses sessions by a caller-chosen id rather
    /// than one minted by [`create_session`](Self::create_session).
    pub fn get_or_create(&self, id: &str) -> SessionRecord {
        let mut map = self.sessions.write().expect("session manager lock poisoned");
        if let Some(record) = map.get_mut(id) {
            record.last_active_at = Utc::now();
            return record.clone();
        }
        let now = Utc::now();
        let record = SessionRecord {
            session_id: id.to_string(),
            channel_id: None,
            user_id: None,
            system_prompt: None,
            created_at: now,
            last_active_at: now,
        };
        map.insert(id.to_string(), record.clone());
        record
    }

    pub fn get_session(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.read().expect("session manager lock poisoned").get(id).cloned()
    }

    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .expect("session manager lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Mark a session active. Returns `false` if the session does not exist.
    pub fn touch_session(&self, id: &str) -> bool {
        let mut map = self.sessions.write().expect("session manager lock poisoned");
        match map.get_mut(id) {
            Some(record) => {
                record.last_active_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove a session. Returns `false` if it did not exist.
    pub fn end_session(&self, id: &str) -> bool {
        self.sessions
            .write()
            .expect("session manager lock poisoned")
            .remove(id)
            .is_some()
    }

    /// Remove every session idle for longer than `max_idle_ms`, returning
    /// the number evicted.
    pub fn evict_idle(&self, max_idle_ms: i64) -> usize {
        let now = Utc::now();
        let mut map = self.sessions.write().expect("session manager lock poisoned");
        let before = map.len();
        map.retain(|_, record| now.signed_duration_since(record.last_active_at).num_milliseconds() <= max_idle_ms);
        before - map.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session manager lock poisoned").len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
