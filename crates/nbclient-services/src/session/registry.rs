//! Running-session registry
//!
//! Every [`DefaultSession`] registers itself here on creation and removes
//! itself on disposal. The registry is keyed by server base URL so several
//! servers can share one process.

use super::default::DefaultSession;
use super::model::SessionModel;
use dashmap::DashMap;
use nbclient_core::Disposable;
use std::fmt;
use std::sync::Arc;

/// Local sessions, grouped by server base URL
#[derive(Default)]
pub struct RunningSessions {
    sessions: DashMap<String, Vec<Arc<DefaultSession>>>,
}

impl RunningSessions {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track a session under its server's base URL
    pub fn register(&self, session: Arc<DefaultSession>) {
        let key = session.settings().base_url().to_string();
        let mut entry = self.sessions.entry(key).or_default();
        if !entry.iter().any(|s| Arc::ptr_eq(s, &session)) {
            entry.push(session);
        }
    }

    /// Stop tracking a session
    pub fn unregister(&self, session: &DefaultSession) {
        let key = session.settings().base_url().to_string();
        let now_empty = match self.sessions.get_mut(&key) {
            Some(mut entry) => {
                entry.retain(|s| !std::ptr::eq(Arc::as_ptr(s), session));
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sessions.remove_if(&key, |_, sessions| sessions.is_empty());
        }
    }

    /// Every local session for a base URL
    #[must_use]
    pub fn sessions_for(&self, base_url: &str) -> Vec<Arc<DefaultSession>> {
        self.sessions
            .get(base_url)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Model of a local session by id
    #[must_use]
    pub fn find_model(&self, base_url: &str, id: &str) -> Option<SessionModel> {
        self.sessions_for(base_url)
            .into_iter()
            .find(|s| s.id() == id)
            .map(|s| s.model())
    }

    /// Model of a local session by path
    #[must_use]
    pub fn find_model_by_path(&self, base_url: &str, path: &str) -> Option<SessionModel> {
        self.sessions_for(base_url)
            .into_iter()
            .find(|s| s.path() == path)
            .map(|s| s.model())
    }

    /// Push a fresh server model into every local session with its id
    pub fn update_from_server(&self, base_url: &str, model: &SessionModel) {
        for session in self.sessions_for(base_url) {
            if session.id() == model.id {
                session.update(model);
            }
        }
    }

    /// Reconcile against a complete server listing
    ///
    /// Local sessions missing from `models` are disposed; the rest are
    /// updated.
    pub fn update_running(&self, base_url: &str, models: &[SessionModel]) {
        for session in self.sessions_for(base_url) {
            match models.iter().find(|m| m.id == session.id()) {
                Some(model) => session.update(model),
                None => {
                    tracing::debug!("session {} no longer running", session.id());
                    session.dispose();
                }
            }
        }
    }

    /// Dispose every local session with an id
    pub fn kill(&self, base_url: &str, id: &str) {
        for session in self.sessions_for(base_url) {
            if session.id() == id {
                session.dispose();
            }
        }
    }

    /// Number of local sessions across all servers
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Whether no session is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every session and forget all servers
    pub fn clear(&self) {
        let all: Vec<Arc<DefaultSession>> = self
            .sessions
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        for session in all {
            session.dispose();
        }
        self.sessions.clear();
    }
}

impl fmt::Debug for RunningSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningSessions")
            .field("servers", &self.sessions.len())
            .field("sessions", &self.len())
            .finish()
    }
}
