// Process-scoped session registry.
//
// The OAuth dance itself lives outside this service; whatever performs it
// deposits `(session id → provider credential + user)` here. The registry
// has an explicit lifecycle: it is created at startup and owned by the
// router state, never ambient module state.

use std::collections::HashMap;
use std::sync::RwLock;

use engram_common::types::{Credential, OwnerUser};
use uuid::Uuid;

/// One authenticated provider session.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub credential: Credential,
    pub user: OwnerUser,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, ProviderSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under a freshly generated id and return it.
    pub fn create(&self, session: ProviderSession) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.insert(session_id.clone(), session);
        session_id
    }

    pub fn insert(&self, session_id: impl Into<String>, session: ProviderSession) {
        self.inner
            .write()
            .expect("session registry lock poisoned")
            .insert(session_id.into(), session);
    }

    pub fn resolve(&self, session_id: &str) -> Option<ProviderSession> {
        self.inner.read().expect("session registry lock poisoned").get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.inner.write().expect("session registry lock poisoned").remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("session registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
