//! In-memory `SessionStore`. Used by tests and by the daemon when no
//! database URL is configured.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use lwd_schemas::{CaptureRecord, LorrySession, SessionStatus, TareEntry};

use crate::store::{SessionStore, StoreError};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, LorrySession>,
    captures: Vec<CaptureRecord>,
    tares: BTreeMap<NaiveDate, TareEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    async fn delete_captures(&self, session_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.captures.len();
        inner.captures.retain(|c| c.session_id != session_id);
        Ok((before - inner.captures.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &LorrySession) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Backend(format!(
                "duplicate session id {}",
                session.id
            )));
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<LorrySession>, StoreError> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<LorrySession>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<LorrySession> = inner.sessions.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn find_active(&self) -> Result<Option<LorrySession>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.status == SessionStatus::Active)
            .cloned())
    }

    async fn update_session(&self, session: &LorrySession) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_session(
        &self,
        id: Uuid,
        purge_captures: bool,
    ) -> Result<Option<u64>, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.sessions.remove(&id).is_none() {
            return Ok(None);
        }
        if !purge_captures {
            return Ok(Some(0));
        }
        let before = inner.captures.len();
        inner.captures.retain(|c| c.session_id != id);
        Ok(Some((before - inner.captures.len()) as u64))
    }

    async fn append_capture(
        &self,
        session: &LorrySession,
        record: &CaptureRecord,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(slot) = inner.sessions.get_mut(&session.id) else {
            return Ok(false);
        };
        *slot = session.clone();
        inner.captures.push(record.clone());
        Ok(true)
    }

    async fn list_captures(&self, session_id: Uuid) -> Result<Vec<CaptureRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<CaptureRecord> = inner
            .captures
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    async fn get_tare(&self, day: NaiveDate) -> Result<Option<TareEntry>, StoreError> {
        Ok(self.inner.read().await.tares.get(&day).cloned())
    }

    async fn put_tare(&self, entry: &TareEntry) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .tares
            .insert(entry.day, entry.clone());
        Ok(())
    }
}
