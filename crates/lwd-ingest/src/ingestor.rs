//! Per-channel connection state machine.
//!
//! `Disconnected -> Connecting -> Connected | Simulated`, with
//! `Connected -> Simulated` when a live transport drops. Every `connect`
//! bumps the channel generation; events carry it so consumers can discard
//! anything produced by a superseded connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use lwd_config::{ControllerChannelConfig, ScaleChannelConfig, SimulationConfig};
use lwd_schemas::{ConnectionState, WeightSample, WeightSource};

use crate::parse::FrameDecoder;
use crate::simulator::Simulator;
use crate::transport::{FrameStream, TransportConnector};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything an ingestor reports to its consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestEvent {
    Sample {
        generation: u64,
        sample: WeightSample,
    },
    Status {
        source: WeightSource,
        generation: u64,
        state: ConnectionState,
    },
}

impl IngestEvent {
    pub fn generation(&self) -> u64 {
        match self {
            IngestEvent::Sample { generation, .. } | IngestEvent::Status { generation, .. } => {
                *generation
            }
        }
    }

    pub fn source(&self) -> WeightSource {
        match self {
            IngestEvent::Sample { sample, .. } => sample.source,
            IngestEvent::Status { source, .. } => *source,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The transport-independent part of a channel's config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub probe_timeout: Duration,
    pub simulation: SimulationConfig,
    pub decoder: FrameDecoder,
}

impl ChannelSettings {
    pub fn controller(cfg: &ControllerChannelConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            probe_timeout: Duration::from_millis(cfg.probe_timeout_ms),
            simulation: cfg.simulation.clone(),
            decoder: FrameDecoder::Controller {
                topic: cfg.topic.clone(),
            },
        }
    }

    pub fn scale(cfg: &ScaleChannelConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            probe_timeout: Duration::from_millis(cfg.probe_timeout_ms),
            simulation: cfg.simulation.clone(),
            decoder: FrameDecoder::Scale,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared channel handle
// ---------------------------------------------------------------------------

struct ChannelShared {
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
}

/// Cheap clone handed to background tasks.
#[derive(Clone)]
struct ChannelHandle {
    source: WeightSource,
    events: mpsc::Sender<IngestEvent>,
    shared: Arc<ChannelShared>,
}

impl ChannelHandle {
    fn state(&self) -> ConnectionState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Apply a state change on behalf of `generation`. Superseded
    /// generations and no-op transitions are ignored.
    fn transition(&self, generation: u64, next: ConnectionState) {
        {
            let mut st = self
                .shared
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.generation() != generation || *st == next {
                return;
            }
            tracing::info!(channel = %self.source, from = %*st, to = %next, generation, "channel state");
            *st = next;
        }
        self.emit(IngestEvent::Status {
            source: self.source,
            generation,
            state: next,
        });
    }

    fn emit(&self, event: IngestEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(channel = %self.source, "ingest queue full; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(channel = %self.source, "ingest consumer gone; event dropped");
            }
        }
    }
}

/// Read-only view of a channel, usable while the ingestor itself is busy
/// reconnecting.
#[derive(Clone)]
pub struct ChannelProbe {
    shared: Arc<ChannelShared>,
}

impl ChannelProbe {
    pub fn state(&self) -> ConnectionState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Events tagged with any other generation are stale.
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// SensorIngestor
// ---------------------------------------------------------------------------

/// Owns one hardware channel. Produces samples from the real transport when
/// reachable, otherwise from a simulator.
pub struct SensorIngestor {
    handle: ChannelHandle,
    task: Option<JoinHandle<()>>,
    seed: Option<u64>,
}

impl SensorIngestor {
    pub fn new(source: WeightSource, events: mpsc::Sender<IngestEvent>) -> Self {
        Self {
            handle: ChannelHandle {
                source,
                events,
                shared: Arc::new(ChannelShared {
                    state: Mutex::new(ConnectionState::Disconnected),
                    generation: AtomicU64::new(0),
                }),
            },
            task: None,
            seed: None,
        }
    }

    /// Deterministic simulator output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn source(&self) -> WeightSource {
        self.handle.source
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    pub fn probe(&self) -> ChannelProbe {
        ChannelProbe {
            shared: Arc::clone(&self.handle.shared),
        }
    }

    /// Tear down any previous connection, then probe the transport. Resolves
    /// to `Connected` or `Simulated`; transport failure is never an error.
    pub async fn connect(
        &mut self,
        settings: ChannelSettings,
        connector: Box<dyn TransportConnector>,
    ) -> ConnectionState {
        self.disconnect();

        let generation = self.handle.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.handle.transition(generation, ConnectionState::Connecting);

        if !settings.enabled {
            tracing::info!(channel = %self.handle.source, "hardware disabled; simulating");
            return self.start_simulated(generation, &settings.simulation);
        }

        let target = connector.describe();
        match tokio::time::timeout(settings.probe_timeout, connector.open()).await {
            Ok(Ok(stream)) => {
                tracing::info!(channel = %self.handle.source, %target, "transport connected");
                self.handle.transition(generation, ConnectionState::Connected);
                let sim = self.simulator(&settings.simulation);
                let interval = settings.simulation.interval();
                self.task = Some(tokio::spawn(run_transport(
                    self.handle.clone(),
                    generation,
                    stream,
                    settings.decoder,
                    sim,
                    interval,
                )));
                ConnectionState::Connected
            }
            Ok(Err(e)) => {
                tracing::warn!(channel = %self.handle.source, %target, error = %e, "transport unavailable; simulating");
                self.start_simulated(generation, &settings.simulation)
            }
            Err(_) => {
                let timeout_ms = settings.probe_timeout.as_millis() as u64;
                tracing::warn!(
                    channel = %self.handle.source,
                    %target,
                    timeout_ms,
                    "transport probe timed out; simulating"
                );
                self.start_simulated(generation, &settings.simulation)
            }
        }
    }

    /// Stop producing and release the transport. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let generation = self.handle.generation();
        self.handle
            .transition(generation, ConnectionState::Disconnected);
    }

    fn start_simulated(&mut self, generation: u64, cfg: &SimulationConfig) -> ConnectionState {
        self.handle.transition(generation, ConnectionState::Simulated);
        let sim = self.simulator(cfg);
        self.task = Some(tokio::spawn(run_simulator(
            self.handle.clone(),
            generation,
            sim,
            cfg.interval(),
        )));
        ConnectionState::Simulated
    }

    fn simulator(&self, cfg: &SimulationConfig) -> Simulator {
        match self.seed {
            Some(seed) => Simulator::seeded(self.handle.source, cfg, seed),
            None => Simulator::new(self.handle.source, cfg),
        }
    }
}

impl Drop for SensorIngestor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn run_transport(
    handle: ChannelHandle,
    generation: u64,
    mut stream: Box<dyn FrameStream>,
    decoder: FrameDecoder,
    sim: Simulator,
    interval: Duration,
) {
    loop {
        match stream.next_frame().await {
            Ok(Some(frame)) => match decoder.decode(&frame) {
                Ok(Some(reading)) => handle.emit(IngestEvent::Sample {
                    generation,
                    sample: WeightSample {
                        source: handle.source,
                        value: reading.value,
                        stable: reading.stable,
                        captured_at: Utc::now(),
                    },
                }),
                Ok(None) => {}
                Err(e) if decoder.drop_level() == tracing::Level::DEBUG => {
                    tracing::debug!(channel = %handle.source, error = %e, "dropping unparseable frame");
                }
                Err(e) => {
                    tracing::trace!(channel = %handle.source, error = %e, "dropping unparseable frame");
                }
            },
            Ok(None) => {
                tracing::warn!(channel = %handle.source, "transport closed; simulating");
                break;
            }
            Err(e) => {
                tracing::warn!(channel = %handle.source, error = %e, "transport failed; simulating");
                break;
            }
        }
    }
    drop(stream);

    handle.transition(generation, ConnectionState::Simulated);
    run_simulator(handle, generation, sim, interval).await;
}

async fn run_simulator(handle: ChannelHandle, generation: u64, mut sim: Simulator, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        handle.emit(IngestEvent::Sample {
            generation,
            sample: sim.next_sample(),
        });
    }
}
