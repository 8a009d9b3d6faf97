//! Portal session state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The signed-in user's token. No token is the idle, signed-out state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: Option<String>,
    pub email: String,
}

impl Session {
    pub fn new(email: &str, token: String) -> Self {
        Self {
            token: Some(token),
            email: email.to_string(),
        }
    }

    /// The token, if present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Signed-in sessions keyed by their identity provider token.
///
/// A request is authenticated only when it presents a token held here.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `session` under its token. Sessions without a token are ignored.
    pub async fn insert(&self, session: Session) {
        if let Some(token) = session.token() {
            let token = token.to_string();
            self.sessions.write().await.insert(token, session);
        }
    }

    pub async fn get(&self, token: &str) -> Option<Session> {
        if token.is_empty() {
            return None;
        }
        self.sessions.read().await.get(token).cloned()
    }

    /// Forget the session for `token`. Returns how many sessions remain.
    pub async fn remove(&self, token: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token);
        sessions.len()
    }
}
