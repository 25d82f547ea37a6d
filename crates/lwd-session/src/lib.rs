//! lwd-session
//!
//! Lorry queue lifecycle and the weight-capture flow.
//!
//! - `state_machine`: pure status rules.
//! - `store`: the persistence trait; `memory` is the in-process impl.
//! - `manager`: `SessionManager`, which serializes transitions, consults the
//!   reconciliation engine on capture and publishes domain events.

mod manager;
mod memory;
mod state_machine;
mod store;

pub use manager::{CaptureRequest, SessionError, SessionManager};
pub use memory::MemoryStore;
pub use state_machine::{next_status, SessionAction, TransitionError};
pub use store::{SessionStore, StoreError};
