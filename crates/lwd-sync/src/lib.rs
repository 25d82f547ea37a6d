//! Outbound sync of captures to the external system.
//!
//! Delivery is at-least-once per attempt window and never affects local
//! state: a capture is committed before it is published, and the forwarder
//! only ever reads from the bus.

mod forwarder;
mod target;

pub use forwarder::{DeliveryOutcome, SyncForwarder, SyncStatsSnapshot};
pub use target::{HttpSyncTarget, SyncError, SyncPayload, SyncTarget};
