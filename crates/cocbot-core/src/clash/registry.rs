use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use super::{error::RegistryError, session::ClashSession};

/// Process-wide map from handle to its live session.
///
/// A handle is present at most once. Sessions insert themselves when they
/// start tracking and remove themselves on disconnect.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, ClashSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: ClashSession) -> Result<(), RegistryError> {
        let mut map = self.sessions.lock().await;
        if map.contains_key(session.handle()) {
            return Err(RegistryError::AlreadyActive(session.handle().to_string()));
        }
        map.insert(session.handle().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, handle: &str) -> Option<ClashSession> {
        self.sessions.lock().await.get(handle).cloned()
    }

    pub async fn remove(&self, handle: &str) -> Option<ClashSession> {
        self.sessions.lock().await.remove(handle)
    }

    /// Remove `session` only if it is the entry registered under its handle.
    pub(crate) async fn remove_session(&self, session: &ClashSession) -> bool {
        let mut map = self.sessions.lock().await;
        match map.get(session.handle()) {
            Some(current) if current.same_as(session) => {
                map.remove(session.handle());
                true
            }
            _ => false,
        }
    }

    pub async fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Take every session out, leaving the registry empty.
    pub async fn drain(&self) -> Vec<ClashSession> {
        self.sessions.lock().await.drain().map(|(_, s)| s).collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
