//! Persistence boundary.
//!
//! The manager only ever talks to a `SessionStore`. Implementations must be
//! safe to share across tasks; the manager serializes state transitions
//! itself, so stores need no cross-call locking.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use lwd_schemas::{CaptureRecord, LorrySession, TareEntry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("stored row is invalid: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &LorrySession) -> Result<(), StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<LorrySession>, StoreError>;

    /// Oldest first by `created_at`.
    async fn list_sessions(&self) -> Result<Vec<LorrySession>, StoreError>;

    async fn find_active(&self) -> Result<Option<LorrySession>, StoreError>;

    /// Full-row replace keyed by `session.id`. Returns `false` when no such row.
    async fn update_session(&self, session: &LorrySession) -> Result<bool, StoreError>;

    /// Delete the session row and, with `purge_captures`, its captures, as
    /// one unit. `None` (nothing written) when no such row; otherwise the
    /// number of captures deleted.
    async fn remove_session(&self, id: Uuid, purge_captures: bool)
        -> Result<Option<u64>, StoreError>;

    /// Replace the `session` row and insert `record` as one unit. Returns
    /// `false`, with nothing written, when the session row is missing.
    async fn append_capture(
        &self,
        session: &LorrySession,
        record: &CaptureRecord,
    ) -> Result<bool, StoreError>;

    /// Oldest first by `created_at`.
    async fn list_captures(&self, session_id: Uuid) -> Result<Vec<CaptureRecord>, StoreError>;

    async fn get_tare(&self, day: NaiveDate) -> Result<Option<TareEntry>, StoreError>;

    /// Insert or replace the tare for `entry.day`.
    async fn put_tare(&self, entry: &TareEntry) -> Result<(), StoreError>;
}
