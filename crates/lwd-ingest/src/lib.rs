//! lwd-ingest
//!
//! Sensor ingestion for the two weight channels: transport connectors,
//! payload parsing, simulator fallback and the per-channel state machine.
//!
//! Consumers receive [`IngestEvent`]s over a bounded mpsc queue. Sends never
//! block the channel task; a full queue drops the event with a warning.

pub mod ingestor;
pub mod parse;
pub mod simulator;
pub mod transport;

pub use ingestor::{ChannelProbe, ChannelSettings, IngestEvent, SensorIngestor};
pub use parse::{FrameDecoder, ParseError, Reading};
pub use simulator::Simulator;
pub use transport::{
    ConnectorFactory, FrameStream, HardwareConnectors, LineStreamConnector, PubSubConnector,
    TransportConnector, TransportError,
};
