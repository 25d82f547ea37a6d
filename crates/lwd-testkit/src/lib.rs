//! Shared fixtures for weigh desk scenario tests.

mod sync;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use lwd_bus::{next_event, DomainEvent, Envelope};
use lwd_config::{AppConfig, SimulationConfig};
use lwd_ingest::ConnectorFactory;
use lwd_runtime::{Runtime, RuntimeDeps, RuntimeError};
use lwd_schemas::{Grams, WeightSource};
use lwd_session::MemoryStore;

pub use sync::RecordingSyncTarget;
pub use transport::{ChannelScript, Script, ScriptedConnectors};

/// Defaults with fast, noise-free simulators on both channels and a short
/// reconnect cooldown.
pub fn desk_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    let sim = SimulationConfig {
        baseline_kg: Grams::new(12_000),
        variance_kg: Grams::ZERO,
        interval_ms: 100,
    };
    cfg.controller.simulation = sim.clone();
    cfg.scale.simulation = sim;
    cfg.controller.probe_timeout_ms = 200;
    cfg.scale.probe_timeout_ms = 200;
    cfg.runtime.reconnect_cooldown_ms = 50;
    cfg.sync.enabled = true;
    cfg.sync.endpoint = "http://sync.test/captures".to_string();
    cfg.sync.base_backoff_ms = 10;
    cfg.sync.max_backoff_ms = 40;
    cfg
}

/// A started runtime over an in-memory store and a recording sync target.
pub struct Desk {
    pub runtime: Runtime,
    pub store: Arc<MemoryStore>,
    pub sync: Arc<RecordingSyncTarget>,
}

pub async fn start_desk(
    cfg: &AppConfig,
    connectors: Arc<dyn ConnectorFactory>,
) -> Result<Desk, RuntimeError> {
    start_desk_with(cfg, connectors, Arc::new(RecordingSyncTarget::new())).await
}

pub async fn start_desk_with(
    cfg: &AppConfig,
    connectors: Arc<dyn ConnectorFactory>,
    sync: Arc<RecordingSyncTarget>,
) -> Result<Desk, RuntimeError> {
    let store = Arc::new(MemoryStore::new());
    let runtime = Runtime::start(
        cfg,
        RuntimeDeps {
            store: store.clone(),
            connectors,
            sync_target: sync.clone(),
            sim_seed: Some(7),
        },
    )
    .await?;
    Ok(Desk {
        runtime,
        store,
        sync,
    })
}

impl Desk {
    /// Wait until both channels have a latest sample.
    pub async fn wait_for_samples(&self, within: Duration) -> bool {
        wait_until(within, || {
            let engine = self.runtime.engine();
            engine.latest(WeightSource::Controller).is_some()
                && engine.latest(WeightSource::Scale).is_some()
        })
        .await
    }
}

/// Poll `cond` every 10ms until it holds or `within` elapses.
pub async fn wait_until(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next envelope whose event satisfies `pred`, or `None` on timeout.
pub async fn next_matching(
    rx: &mut broadcast::Receiver<Envelope>,
    within: Duration,
    mut pred: impl FnMut(&DomainEvent) -> bool,
) -> Option<Envelope> {
    tokio::time::timeout(within, async {
        while let Some(env) = next_event(rx).await {
            if pred(&env.event) {
                return Some(env);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
