use async_trait::async_trait;
use dashmap::DashMap;

use super::{SessionBackend, SessionMap};
use crate::error::SessionError;

/// Keeps session records in process memory. Records are lost on restart.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    records: DashMap<String, SessionMap>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record directly, bypassing the session store.
    pub fn insert(&self, session_id: impl Into<String>, session: SessionMap) {
        self.records.insert(session_id.into(), session);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn read(&self, session_id: &str) -> Result<Option<SessionMap>, SessionError> {
        Ok(self.records.get(session_id).map(|record| record.value().clone()))
    }

    async fn write(&self, session_id: &str, session: &SessionMap) -> Result<(), SessionError> {
        self.records.insert(session_id.to_string(), session.clone());
        Ok(())
    }
}
