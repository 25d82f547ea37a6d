//! lwd-runtime
//!
//! Wires the weigh desk together: two ingestors feeding the reconciliation
//! engine through one queue, the session manager, the sync forwarder and the
//! config controller that reconfigures them while running.

mod controller;
mod pump;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lwd_bus::EventBus;
use lwd_config::{AppConfig, ConfigError, Validate};
use lwd_ingest::{ConnectorFactory, SensorIngestor};
use lwd_reconcile::ReconciliationEngine;
use lwd_schemas::{ConnectionState, LorrySession, ToleranceCheck, WeightSample, WeightSource};
use lwd_session::{SessionError, SessionManager, SessionStore};
use lwd_sync::{SyncForwarder, SyncStatsSnapshot, SyncTarget};

pub use controller::{ConfigController, ConfigSnapshot};

use controller::ControllerParts;
use pump::Probes;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Pluggable edges of the runtime.
pub struct RuntimeDeps {
    pub store: Arc<dyn SessionStore>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub sync_target: Arc<dyn SyncTarget>,
    /// Fixed simulator seed for reproducible runs.
    pub sim_seed: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelReport {
    pub channel: WeightSource,
    pub state: ConnectionState,
    pub generation: u64,
    pub latest: Option<WeightSample>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub channels: Vec<ChannelReport>,
    pub check: ToleranceCheck,
    pub active_session: Option<LorrySession>,
    pub sync: SyncStatsSnapshot,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct Runtime {
    bus: EventBus,
    engine: Arc<ReconciliationEngine>,
    sessions: Arc<SessionManager>,
    sync: Arc<SyncForwarder>,
    config: Arc<ConfigController>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Build every component from `cfg`, start background tasks and connect
    /// both channels. Returns once each channel is `Connected` or
    /// `Simulated`.
    pub async fn start(cfg: &AppConfig, deps: RuntimeDeps) -> Result<Self, RuntimeError> {
        cfg.validate()?;
        let tz = cfg.site.tz()?;

        let bus = EventBus::new(cfg.runtime.event_bus_capacity);
        let engine = Arc::new(ReconciliationEngine::new(cfg.tolerance.clone()));
        let sessions = Arc::new(SessionManager::new(
            deps.store,
            Arc::clone(&engine),
            bus.clone(),
            tz,
            cfg.session.on_remove,
        ));

        let sync = Arc::new(SyncForwarder::new(cfg.sync.clone(), deps.sync_target));
        let mut tasks = vec![sync.spawn(&bus), sync.spawn_heartbeat()];

        let (tx, rx) = mpsc::channel(cfg.runtime.ingest_queue_capacity);
        let mut controller = SensorIngestor::new(WeightSource::Controller, tx.clone());
        let mut scale = SensorIngestor::new(WeightSource::Scale, tx);
        if let Some(seed) = deps.sim_seed {
            controller = controller.with_seed(seed);
            scale = scale.with_seed(seed.wrapping_add(1));
        }

        let config = Arc::new(ConfigController::new(ControllerParts {
            controller_cfg: cfg.controller.clone(),
            scale_cfg: cfg.scale.clone(),
            controller,
            scale,
            connectors: deps.connectors,
            engine: Arc::clone(&engine),
            sync: Arc::clone(&sync),
            cooldown: cfg.runtime.reconnect_cooldown(),
        }));

        let probes = Probes {
            controller: config.probe(WeightSource::Controller),
            scale: config.probe(WeightSource::Scale),
        };
        tasks.push(pump::spawn_pump(rx, probes, Arc::clone(&engine), bus.clone()));

        config.connect_all().await;
        tracing::info!(
            controller = %config.channel_state(WeightSource::Controller),
            scale = %config.channel_state(WeightSource::Scale),
            timezone = %cfg.site.timezone,
            "runtime started"
        );

        Ok(Self {
            bus,
            engine,
            sessions,
            sync,
            config,
            tasks,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn sync(&self) -> &Arc<SyncForwarder> {
        &self.sync
    }

    pub fn config(&self) -> &Arc<ConfigController> {
        &self.config
    }

    /// Current reconciliation result from the latest samples.
    pub fn check(&self) -> ToleranceCheck {
        self.engine.check()
    }

    pub async fn status(&self) -> Result<RuntimeStatus, RuntimeError> {
        let channels = [WeightSource::Controller, WeightSource::Scale]
            .into_iter()
            .map(|source| ChannelReport {
                channel: source,
                state: self.config.channel_state(source),
                generation: self.config.channel_generation(source),
                latest: self.engine.latest(source),
            })
            .collect();

        Ok(RuntimeStatus {
            channels,
            check: self.engine.check(),
            active_session: self.sessions.active_session().await?,
            sync: self.sync.stats(),
        })
    }

    /// Disconnect both channels and stop background tasks.
    pub async fn shutdown(&mut self) {
        self.config.disconnect_all().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("runtime stopped");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
