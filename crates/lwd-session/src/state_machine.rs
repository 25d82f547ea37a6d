//! Session lifecycle rules.
//!
//! ```text
//!   create ──► Waiting ──activate──► Active ──complete──► Completed (term.)
//!                 │                    │
//!                 └──────remove────────┴──► (deleted)
//! ```
//!
//! Only the status rules live here. Cross-session guards (single active,
//! tare present) are checked by the manager under its transition lock.

use std::fmt;

use lwd_schemas::SessionStatus;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    Activate,
    Complete,
    Remove,
    Capture,
}

impl fmt::Display for SessionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionAction::Activate => "activate",
            SessionAction::Complete => "complete",
            SessionAction::Remove => "remove",
            SessionAction::Capture => "capture",
        })
    }
}

/// Returned when `action` is not legal from `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionStatus,
    pub action: SessionAction,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {} a session that is {}", self.action, self.from)
    }
}

impl std::error::Error for TransitionError {}

/// Status after applying `action`. `None` means the session is deleted.
/// `Capture` leaves the status unchanged.
pub fn next_status(
    from: SessionStatus,
    action: SessionAction,
) -> Result<Option<SessionStatus>, TransitionError> {
    use SessionAction as A;
    use SessionStatus as S;

    match (from, action) {
        (S::Waiting, A::Activate) => Ok(Some(S::Active)),
        (S::Active, A::Complete) => Ok(Some(S::Completed)),
        (S::Active, A::Capture) => Ok(Some(S::Active)),
        (S::Waiting | S::Active, A::Remove) => Ok(None),
        _ => Err(TransitionError { from, action }),
    }
}
