use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use uuid::Uuid;

use lwd_bus::{CapturePublished, DomainEvent, EventBus, SessionRemoval, StatusChange};
use lwd_config::CaptureRetention;
use lwd_reconcile::ReconciliationEngine;
use lwd_schemas::{
    CaptureRecord, DisagreementPolicy, Grams, LorrySession, NewSession, SessionStatus,
    TareEntry, ToleranceCheck, ToleranceStatus,
};

use crate::state_machine::{next_status, SessionAction};
use crate::store::{SessionStore, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid transition for session {id}: {reason}")]
    InvalidTransition { id: Uuid, reason: String },
    #[error("invalid capture: {0}")]
    InvalidCapture(String),
    /// The `block` policy refused a capture whose check was `error`.
    #[error("capture blocked: sources differ by {} kg (tolerance {} kg)", .0.difference, .0.tolerance)]
    CaptureBlocked(ToleranceCheck),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    fn transition(id: Uuid, reason: impl Into<String>) -> Self {
        SessionError::InvalidTransition {
            id,
            reason: reason.into(),
        }
    }
}

/// Input to [`SessionManager::record_capture`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    pub tag_id: String,
    /// When set, must name the active session.
    pub session_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Owns the queue lifecycle and the capture flow.
///
/// Every mutating operation takes `transitions` first, so racing requests
/// are applied one at a time against fresh store state. The loser of a race
/// sees the winner's result and is rejected explicitly.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    engine: Arc<ReconciliationEngine>,
    bus: EventBus,
    tz: Tz,
    retention: CaptureRetention,
    transitions: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        engine: Arc<ReconciliationEngine>,
        bus: EventBus,
        tz: Tz,
        retention: CaptureRetention,
    ) -> Self {
        Self {
            store,
            engine,
            bus,
            tz,
            retention,
            transitions: Mutex::new(()),
        }
    }

    /// Operating day in the site timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    // --- reads -------------------------------------------------------------

    pub async fn get_session(&self, id: Uuid) -> Result<LorrySession, SessionError> {
        self.store
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn list_sessions(&self) -> Result<Vec<LorrySession>, SessionError> {
        Ok(self.store.list_sessions().await?)
    }

    pub async fn active_session(&self) -> Result<Option<LorrySession>, SessionError> {
        Ok(self.store.find_active().await?)
    }

    /// Captures outlive a removed session under `retain`, so this does not
    /// require the session to exist.
    pub async fn list_captures(&self, session_id: Uuid) -> Result<Vec<CaptureRecord>, SessionError> {
        Ok(self.store.list_captures(session_id).await?)
    }

    // --- tare --------------------------------------------------------------

    pub async fn tare_for(&self, day: NaiveDate) -> Result<Option<TareEntry>, SessionError> {
        Ok(self.store.get_tare(day).await?)
    }

    pub async fn set_tare(&self, day: NaiveDate, tare: Grams) -> Result<TareEntry, SessionError> {
        if tare.is_negative() {
            return Err(SessionError::InvalidRequest(
                "tare_weight must be >= 0".to_string(),
            ));
        }
        let entry = TareEntry {
            day,
            tare_weight: tare,
            updated_at: Utc::now(),
        };
        self.store.put_tare(&entry).await?;
        tracing::info!(%day, tare = %tare, "tare set");
        Ok(entry)
    }

    // --- lifecycle ---------------------------------------------------------

    pub async fn create_session(&self, new: NewSession) -> Result<LorrySession, SessionError> {
        let lorry_number = new.lorry_number.trim();
        if lorry_number.is_empty() {
            return Err(SessionError::InvalidRequest(
                "lorry_number must not be empty".to_string(),
            ));
        }

        let session = LorrySession {
            id: Uuid::new_v4(),
            lorry_number: lorry_number.to_string(),
            line: new.line.trim().to_string(),
            line_manager: new.line_manager.trim().to_string(),
            tare_weight: Grams::ZERO,
            status: SessionStatus::Waiting,
            total_bags: 0,
            created_at: Utc::now(),
            activated_at: None,
            completed_at: None,
        };

        let _guard = self.transitions.lock().await;
        self.store.insert_session(&session).await?;
        tracing::info!(session_id = %session.id, lorry = %session.lorry_number, "session created");
        self.bus
            .publish(DomainEvent::SessionCreated(session.clone()));
        Ok(session)
    }

    /// Waiting -> Active. Requires no other active session and a tare for
    /// the current operating day.
    pub async fn activate(&self, id: Uuid) -> Result<LorrySession, SessionError> {
        let _guard = self.transitions.lock().await;

        let mut session = self.load(id).await?;
        let previous = session.status;
        let next = self.advance(&session, SessionAction::Activate)?;

        if let Some(active) = self.store.find_active().await? {
            return Err(SessionError::transition(
                id,
                format!(
                    "session {} ({}) is already active",
                    active.id, active.lorry_number
                ),
            ));
        }

        let day = self.today();
        let tare = self.store.get_tare(day).await?.ok_or_else(|| {
            SessionError::transition(id, format!("no tare configured for {day}"))
        })?;

        session.status = next;
        session.tare_weight = tare.tare_weight;
        session.activated_at = Some(Utc::now());
        self.save(&session).await?;

        tracing::info!(session_id = %id, tare = %session.tare_weight, "session activated");
        self.publish_status(&session, previous);
        Ok(session)
    }

    /// Active -> Completed with the caller's final bag count.
    pub async fn complete(&self, id: Uuid, total_bags: u32) -> Result<LorrySession, SessionError> {
        let _guard = self.transitions.lock().await;

        let mut session = self.load(id).await?;
        let previous = session.status;
        session.status = self.advance(&session, SessionAction::Complete)?;
        session.total_bags = total_bags;
        session.completed_at = Some(Utc::now());
        self.save(&session).await?;

        tracing::info!(session_id = %id, total_bags, "session completed");
        self.publish_status(&session, previous);
        Ok(session)
    }

    /// Delete a waiting or active session. Its captures are kept or purged
    /// per the configured retention.
    pub async fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        let _guard = self.transitions.lock().await;

        let session = self.load(id).await?;
        if let Err(e) = next_status(session.status, SessionAction::Remove) {
            return Err(SessionError::transition(id, e.to_string()));
        }

        let captures_purged = self.retention == CaptureRetention::Purge;
        let deleted = self
            .store
            .remove_session(id, captures_purged)
            .await?
            .ok_or(SessionError::NotFound(id))?;
        if captures_purged {
            tracing::info!(session_id = %id, deleted, "captures purged");
        }

        tracing::info!(session_id = %id, status = %session.status, "session removed");
        self.bus
            .publish(DomainEvent::SessionRemoved(SessionRemoval {
                id,
                lorry_number: session.lorry_number,
                status: session.status,
                captures_purged,
            }));
        Ok(())
    }

    // --- capture -----------------------------------------------------------

    /// Persist one weighment against the active session.
    ///
    /// Policy handling for a non-good check:
    /// - `log`: recorded, warning logged.
    /// - `review`: recorded with `needs_review`.
    /// - `block`: `error` is refused and nothing is persisted; `warning` is
    ///   recorded and logged.
    pub async fn record_capture(&self, req: CaptureRequest) -> Result<CaptureRecord, SessionError> {
        let tag_id = req.tag_id.trim();
        if tag_id.is_empty() {
            return Err(SessionError::InvalidCapture(
                "tag_id must not be empty".to_string(),
            ));
        }

        let _guard = self.transitions.lock().await;

        let mut session = self
            .store
            .find_active()
            .await?
            .ok_or_else(|| SessionError::InvalidCapture("no active session".to_string()))?;
        if let Some(wanted) = req.session_id {
            if wanted != session.id {
                return Err(SessionError::InvalidCapture(format!(
                    "session {wanted} is not the active session"
                )));
            }
        }
        self.advance(&session, SessionAction::Capture)?;

        let check = self.engine.check();
        if check.is_no_sample() {
            return Err(SessionError::InvalidCapture(
                "no weight sample available".to_string(),
            ));
        }

        let policy = self.engine.policy();
        let needs_review = disagreement_outcome(policy.on_disagreement, &check, tag_id)?;

        let record = CaptureRecord {
            id: Uuid::new_v4(),
            session_id: session.id,
            tag_id: tag_id.to_string(),
            controller_weight: check.controller_weight,
            scale_weight: check.scale_weight,
            final_weight: check.final_weight,
            tare_weight: session.tare_weight,
            net_weight: check.final_weight - session.tare_weight,
            weight_source: check.weight_source,
            tolerance_status: check.status,
            weight_difference: check.difference,
            needs_review,
            created_at: Utc::now(),
        };
        session.total_bags = session.total_bags.saturating_add(1);
        if !self.store.append_capture(&session, &record).await? {
            return Err(SessionError::NotFound(session.id));
        }

        tracing::info!(
            session_id = %session.id,
            capture_id = %record.id,
            tag_id = %record.tag_id,
            net = %record.net_weight,
            status = %record.tolerance_status,
            "capture recorded"
        );
        self.bus
            .publish(DomainEvent::CaptureCreated(CapturePublished {
                record: record.clone(),
                lorry_number: session.lorry_number,
            }));
        Ok(record)
    }

    // --- helpers -----------------------------------------------------------

    async fn load(&self, id: Uuid) -> Result<LorrySession, SessionError> {
        self.store
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    async fn save(&self, session: &LorrySession) -> Result<(), SessionError> {
        if self.store.update_session(session).await? {
            Ok(())
        } else {
            Err(SessionError::NotFound(session.id))
        }
    }

    /// Status after `action`; only called for actions that keep the session.
    fn advance(
        &self,
        session: &LorrySession,
        action: SessionAction,
    ) -> Result<SessionStatus, SessionError> {
        match next_status(session.status, action) {
            Ok(Some(next)) => Ok(next),
            Ok(None) => Ok(session.status),
            Err(e) => Err(SessionError::transition(session.id, e.to_string())),
        }
    }

    fn publish_status(&self, session: &LorrySession, previous: SessionStatus) {
        self.bus
            .publish(DomainEvent::SessionStatusChanged(StatusChange {
                session: session.clone(),
                previous,
            }));
    }
}

/// `Ok(needs_review)` or the block rejection.
fn disagreement_outcome(
    policy: DisagreementPolicy,
    check: &ToleranceCheck,
    tag_id: &str,
) -> Result<bool, SessionError> {
    if check.status == ToleranceStatus::Good {
        return Ok(false);
    }
    match policy {
        DisagreementPolicy::Block if check.status == ToleranceStatus::Error => {
            tracing::warn!(
                tag_id,
                difference = %check.difference,
                tolerance = %check.tolerance,
                "capture blocked: sources disagree"
            );
            Err(SessionError::CaptureBlocked(check.clone()))
        }
        DisagreementPolicy::Review => {
            tracing::warn!(
                tag_id,
                status = %check.status,
                difference = %check.difference,
                "capture flagged for review"
            );
            Ok(true)
        }
        DisagreementPolicy::Log | DisagreementPolicy::Block => {
            tracing::warn!(
                tag_id,
                status = %check.status,
                difference = %check.difference,
                tolerance = %check.tolerance,
                "capture recorded outside tolerance"
            );
            Ok(false)
        }
    }
}
