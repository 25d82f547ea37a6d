//! lwd-schemas
//!
//! Shared data model for the weigh desk: weight samples, tolerance checks,
//! lorry sessions and capture records. No logic beyond small helpers.

mod weight;

pub use weight::{Grams, WeightParseError};

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Sources and channels
// ---------------------------------------------------------------------------

/// A physical weight source. Also identifies the ingestion channel feeding it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightSource {
    /// Programmable-controller channel (pub/sub transport).
    Controller,
    /// Direct-scale channel (line-stream transport).
    Scale,
}

impl WeightSource {
    pub const ALL: [WeightSource; 2] = [WeightSource::Controller, WeightSource::Scale];

    pub fn as_str(&self) -> &'static str {
        match self {
            WeightSource::Controller => "controller",
            WeightSource::Scale => "scale",
        }
    }
}

impl fmt::Display for WeightSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which value a final weight was taken from. Doubles as the policy's
/// source priority.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightBasis {
    #[default]
    Controller,
    Scale,
    Average,
}

impl From<WeightSource> for WeightBasis {
    fn from(src: WeightSource) -> Self {
        match src {
            WeightSource::Controller => WeightBasis::Controller,
            WeightSource::Scale => WeightBasis::Scale,
        }
    }
}

impl fmt::Display for WeightBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WeightBasis::Controller => "controller",
            WeightBasis::Scale => "scale",
            WeightBasis::Average => "average",
        })
    }
}

/// Connection state of one ingestion channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Real hardware transport is live.
    Connected,
    /// Hardware unavailable; synthetic samples are being emitted.
    Simulated,
}

impl ConnectionState {
    /// `true` when the channel is producing samples (real or synthetic).
    pub fn is_producing(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Simulated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Simulated => "simulated",
        })
    }
}

// ---------------------------------------------------------------------------
// Samples and checks
// ---------------------------------------------------------------------------

/// One normalized reading from a source. Only the latest per source is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightSample {
    pub source: WeightSource,
    pub value: Grams,
    pub stable: bool,
    pub captured_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToleranceStatus {
    Good,
    Warning,
    Error,
}

impl fmt::Display for ToleranceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToleranceStatus::Good => "good",
            ToleranceStatus::Warning => "warning",
            ToleranceStatus::Error => "error",
        })
    }
}

/// Result of reconciling the two sources. Derived on demand, never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToleranceCheck {
    pub difference: Grams,
    pub tolerance: Grams,
    pub status: ToleranceStatus,
    pub final_weight: Grams,
    pub weight_source: WeightBasis,
    pub controller_weight: Option<Grams>,
    pub scale_weight: Option<Grams>,
}

impl ToleranceCheck {
    /// `true` when neither source had a sample at computation time.
    pub fn is_no_sample(&self) -> bool {
        self.controller_weight.is_none() && self.scale_weight.is_none()
    }
}

/// What a capture does when the sources disagree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisagreementPolicy {
    /// Record regardless; log non-good checks.
    #[default]
    Log,
    /// Record and flag non-good checks for manual follow-up.
    Review,
    /// Refuse captures whose check is `error`.
    Block,
}

impl fmt::Display for DisagreementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisagreementPolicy::Log => "log",
            DisagreementPolicy::Review => "review",
            DisagreementPolicy::Block => "block",
        })
    }
}

/// Reconciliation policy in effect for the next tolerance check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilePolicy {
    /// Acceptable absolute difference between the two sources.
    pub tolerance: Grams,
    pub weight_source_priority: WeightBasis,
    pub on_disagreement: DisagreementPolicy,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            tolerance: Grams::new(50),
            weight_source_priority: WeightBasis::Controller,
            on_disagreement: DisagreementPolicy::Log,
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    /// **Terminal.**
    Completed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(SessionStatus::Waiting),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vehicle's queue entry and weighing lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LorrySession {
    pub id: Uuid,
    pub lorry_number: String,
    pub line: String,
    pub line_manager: String,
    /// Copied from the operating day's tare on activation; zero before that.
    pub tare_weight: Grams,
    pub status: SessionStatus,
    pub total_bags: u32,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Caller-supplied fields for a new queue entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub lorry_number: String,
    #[serde(default)]
    pub line: String,
    #[serde(default)]
    pub line_manager: String,
}

// ---------------------------------------------------------------------------
// Capture records
// ---------------------------------------------------------------------------

/// One finalized weighment. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub tag_id: String,
    pub controller_weight: Option<Grams>,
    pub scale_weight: Option<Grams>,
    pub final_weight: Grams,
    pub tare_weight: Grams,
    /// `final_weight - tare_weight`, fixed at capture time.
    pub net_weight: Grams,
    pub weight_source: WeightBasis,
    pub tolerance_status: ToleranceStatus,
    pub weight_difference: Grams,
    /// Set under the `review` disagreement policy for non-good captures.
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
}

/// Tare configured for one operating day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TareEntry {
    pub day: NaiveDate,
    pub tare_weight: Grams,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&WeightSource::Controller).unwrap(),
            "\"controller\""
        );
        assert_eq!(
            serde_json::to_string(&WeightBasis::Average).unwrap(),
            "\"average\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionState::Simulated).unwrap(),
            "\"simulated\""
        );
        assert_eq!(
            serde_json::to_string(&ToleranceStatus::Warning).unwrap(),
            "\"warning\""
        );
    }

    #[test]
    fn session_status_parse_roundtrips_as_str() {
        for st in [
            SessionStatus::Waiting,
            SessionStatus::Active,
            SessionStatus::Completed,
        ] {
            assert_eq!(SessionStatus::parse(st.as_str()), Some(st));
        }
        assert_eq!(SessionStatus::parse("removed"), None);
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
    }

    #[test]
    fn only_connected_and_simulated_produce() {
        assert!(ConnectionState::Connected.is_producing());
        assert!(ConnectionState::Simulated.is_producing());
        assert!(!ConnectionState::Connecting.is_producing());
        assert!(!ConnectionState::Disconnected.is_producing());
    }
}
