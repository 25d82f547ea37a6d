//! lwd-bus
//!
//! In-process fan-out of domain events to live observers.
//!
//! Delivery is best-effort broadcast: a subscriber only sees events published
//! after it subscribed, and a subscriber that falls more than `capacity`
//! events behind loses the overflow. There is no replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use lwd_schemas::{
    CaptureRecord, ConnectionState, LorrySession, SessionStatus, ToleranceCheck, WeightSample,
    WeightSource,
};

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// The fixed event vocabulary. Serializes as `{"type": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "session.created")]
    SessionCreated(LorrySession),
    #[serde(rename = "session.statusChanged")]
    SessionStatusChanged(StatusChange),
    #[serde(rename = "session.removed")]
    SessionRemoved(SessionRemoval),
    #[serde(rename = "capture.created")]
    CaptureCreated(CapturePublished),
    #[serde(rename = "sample.updated")]
    SampleUpdated(SampleUpdate),
    #[serde(rename = "channel.status")]
    ChannelStatus(ChannelStatusChange),
}

impl DomainEvent {
    /// Wire name, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::SessionCreated(_) => "session.created",
            DomainEvent::SessionStatusChanged(_) => "session.statusChanged",
            DomainEvent::SessionRemoved(_) => "session.removed",
            DomainEvent::CaptureCreated(_) => "capture.created",
            DomainEvent::SampleUpdated(_) => "sample.updated",
            DomainEvent::ChannelStatus(_) => "channel.status",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub session: LorrySession,
    pub previous: SessionStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRemoval {
    pub id: Uuid,
    pub lorry_number: String,
    pub status: SessionStatus,
    /// Whether the session's captures were deleted with it.
    pub captures_purged: bool,
}

/// A new capture plus the lorry it was weighed against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapturePublished {
    #[serde(flatten)]
    pub record: CaptureRecord,
    pub lorry_number: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleUpdate {
    pub sample: WeightSample,
    /// Check recomputed right after this sample landed.
    pub check: ToleranceCheck,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatusChange {
    pub channel: WeightSource,
    pub state: ConnectionState,
    pub generation: u64,
}

/// Wire envelope: `{type, data, timestamp}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: DomainEvent,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
}

impl EventBus {
    /// `capacity` bounds how far a subscriber may lag before losing events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receives everything published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stamp and broadcast. Returns how many subscribers were reached; zero
    /// subscribers is not an error.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let kind = event.kind();
        let envelope = Envelope {
            event,
            timestamp: Utc::now(),
        };
        match self.tx.send(envelope) {
            Ok(n) => {
                tracing::trace!(kind, subscribers = n, "event published");
                n
            }
            Err(_) => {
                tracing::trace!(kind, "event published with no subscribers");
                0
            }
        }
    }
}

/// Next envelope for a long-lived subscriber. Lag is logged and skipped;
/// `None` once the bus is gone.
pub async fn next_event(rx: &mut broadcast::Receiver<Envelope>) -> Option<Envelope> {
    loop {
        match rx.recv().await {
            Ok(env) => return Some(env),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "event subscriber lagged; events dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwd_schemas::Grams;

    fn status_event(state: ConnectionState) -> DomainEvent {
        DomainEvent::ChannelStatus(ChannelStatusChange {
            channel: WeightSource::Scale,
            state,
            generation: 1,
        })
    }

    #[test]
    fn envelope_serializes_type_data_timestamp() {
        let env = Envelope {
            event: status_event(ConnectionState::Simulated),
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "channel.status");
        assert_eq!(v["data"]["channel"], "scale");
        assert_eq!(v["data"]["state"], "simulated");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn sample_update_weights_are_kilograms() {
        let sample = WeightSample {
            source: WeightSource::Controller,
            value: Grams::new(12_345),
            stable: true,
            captured_at: Utc::now(),
        };
        let check = lwd_schemas::ToleranceCheck {
            difference: Grams::ZERO,
            tolerance: Grams::new(50),
            status: lwd_schemas::ToleranceStatus::Good,
            final_weight: Grams::new(12_345),
            weight_source: lwd_schemas::WeightBasis::Controller,
            controller_weight: Some(Grams::new(12_345)),
            scale_weight: None,
        };
        let v = serde_json::to_value(DomainEvent::SampleUpdated(SampleUpdate { sample, check }))
            .unwrap();
        assert_eq!(v["type"], "sample.updated");
        assert_eq!(v["data"]["sample"]["value"], 12.345);
    }

    #[tokio::test]
    async fn late_subscriber_sees_no_history() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(status_event(ConnectionState::Connecting)), 0);

        let mut rx = bus.subscribe();
        bus.publish(status_event(ConnectionState::Simulated));

        let env = next_event(&mut rx).await.unwrap();
        assert_eq!(env.event, status_event(ConnectionState::Simulated));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fan_out_preserves_publish_order() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let states = [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Simulated,
        ];
        for st in states {
            assert_eq!(bus.publish(status_event(st)), 2);
        }
        for rx in [&mut a, &mut b] {
            for st in states {
                assert_eq!(next_event(rx).await.unwrap().event, status_event(st));
            }
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_overflow() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(status_event(ConnectionState::Connecting));
        }
        bus.publish(status_event(ConnectionState::Connected));

        // Oldest events are gone; the newest survive.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(4))
        ));
        let env = next_event(&mut rx).await.unwrap();
        assert_eq!(env.event, status_event(ConnectionState::Connecting));
        let env = next_event(&mut rx).await.unwrap();
        assert_eq!(env.event, status_event(ConnectionState::Connected));
    }
}
