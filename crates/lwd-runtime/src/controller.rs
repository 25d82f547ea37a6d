//! Live reconfiguration of the four runtime config categories.
//!
//! Every update merges a patch onto the current record, validates the
//! result and only then swaps it in. Readers load whole records, so they see
//! either the old or the new value, never a mix. Updates within a category
//! are serialized; categories do not block each other.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;

use lwd_config::{
    ConfigError, ControllerChannelConfig, ControllerChannelPatch, Patch, ScaleChannelConfig,
    ScaleChannelPatch, SyncConfig, SyncPatch, TolerancePatch, Validate,
};
use lwd_ingest::{ChannelProbe, ChannelSettings, ConnectorFactory, SensorIngestor};
use lwd_reconcile::ReconciliationEngine;
use lwd_schemas::{ConnectionState, ReconcilePolicy, WeightSource};
use lwd_sync::SyncForwarder;

/// All four categories at one instant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigSnapshot {
    pub controller: ControllerChannelConfig,
    pub scale: ScaleChannelConfig,
    pub sync: SyncConfig,
    pub tolerance: ReconcilePolicy,
}

/// One supervised channel. The ingestor lock also serializes updates to the
/// channel's config category.
struct Channel {
    ingestor: Mutex<SensorIngestor>,
    probe: ChannelProbe,
}

impl Channel {
    fn new(ingestor: SensorIngestor) -> Self {
        let probe = ingestor.probe();
        Self {
            ingestor: Mutex::new(ingestor),
            probe,
        }
    }
}

pub struct ConfigController {
    controller_cfg: ArcSwap<ControllerChannelConfig>,
    scale_cfg: ArcSwap<ScaleChannelConfig>,
    controller: Channel,
    scale: Channel,
    connectors: Arc<dyn ConnectorFactory>,
    engine: Arc<ReconciliationEngine>,
    sync: Arc<SyncForwarder>,
    cooldown: Duration,
    sync_update: Mutex<()>,
    tolerance_update: Mutex<()>,
}

pub(crate) struct ControllerParts {
    pub controller_cfg: ControllerChannelConfig,
    pub scale_cfg: ScaleChannelConfig,
    pub controller: SensorIngestor,
    pub scale: SensorIngestor,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub engine: Arc<ReconciliationEngine>,
    pub sync: Arc<SyncForwarder>,
    pub cooldown: Duration,
}

impl ConfigController {
    pub(crate) fn new(parts: ControllerParts) -> Self {
        Self {
            controller_cfg: ArcSwap::from_pointee(parts.controller_cfg),
            scale_cfg: ArcSwap::from_pointee(parts.scale_cfg),
            controller: Channel::new(parts.controller),
            scale: Channel::new(parts.scale),
            connectors: parts.connectors,
            engine: parts.engine,
            sync: parts.sync,
            cooldown: parts.cooldown,
            sync_update: Mutex::new(()),
            tolerance_update: Mutex::new(()),
        }
    }

    fn channel(&self, source: WeightSource) -> &Channel {
        match source {
            WeightSource::Controller => &self.controller,
            WeightSource::Scale => &self.scale,
        }
    }

    pub(crate) fn probe(&self, source: WeightSource) -> ChannelProbe {
        self.channel(source).probe.clone()
    }

    pub fn channel_state(&self, source: WeightSource) -> ConnectionState {
        self.channel(source).probe.state()
    }

    pub fn channel_generation(&self, source: WeightSource) -> u64 {
        self.channel(source).probe.generation()
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            controller: (*self.controller()).clone(),
            scale: (*self.scale()).clone(),
            sync: (*self.sync()).clone(),
            tolerance: (*self.tolerance()).clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Getters
    // -----------------------------------------------------------------------

    pub fn controller(&self) -> Arc<ControllerChannelConfig> {
        self.controller_cfg.load_full()
    }

    pub fn scale(&self) -> Arc<ScaleChannelConfig> {
        self.scale_cfg.load_full()
    }

    pub fn sync(&self) -> Arc<SyncConfig> {
        self.sync.config()
    }

    pub fn tolerance(&self) -> Arc<ReconcilePolicy> {
        self.engine.policy()
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Merge, validate, swap, then cycle the controller channel.
    pub async fn update_controller(
        &self,
        patch: &ControllerChannelPatch,
    ) -> Result<Arc<ControllerChannelConfig>, ConfigError> {
        let mut ingestor = self.controller.ingestor.lock().await;
        let merged = patch.apply_to(&self.controller_cfg.load());
        merged.validate()?;
        let merged = Arc::new(merged);
        self.controller_cfg.store(Arc::clone(&merged));
        self.cycle(WeightSource::Controller, &mut ingestor).await;
        Ok(merged)
    }

    /// Merge, validate, swap, then cycle the scale channel.
    pub async fn update_scale(
        &self,
        patch: &ScaleChannelPatch,
    ) -> Result<Arc<ScaleChannelConfig>, ConfigError> {
        let mut ingestor = self.scale.ingestor.lock().await;
        let merged = patch.apply_to(&self.scale_cfg.load());
        merged.validate()?;
        let merged = Arc::new(merged);
        self.scale_cfg.store(Arc::clone(&merged));
        self.cycle(WeightSource::Scale, &mut ingestor).await;
        Ok(merged)
    }

    /// In-flight deliveries keep the config they started with.
    pub async fn update_sync(&self, patch: &SyncPatch) -> Result<Arc<SyncConfig>, ConfigError> {
        let _guard = self.sync_update.lock().await;
        let merged = patch.apply_to(&self.sync.config());
        merged.validate()?;
        self.sync.set_config(merged);
        Ok(self.sync.config())
    }

    /// Takes effect on the next check.
    pub async fn update_tolerance(
        &self,
        patch: &TolerancePatch,
    ) -> Result<Arc<ReconcilePolicy>, ConfigError> {
        let _guard = self.tolerance_update.lock().await;
        let merged = patch.apply_to(&self.engine.policy());
        merged.validate()?;
        self.engine.set_policy(merged);
        Ok(self.engine.policy())
    }

    // -----------------------------------------------------------------------
    // Channel lifecycle
    // -----------------------------------------------------------------------

    /// Initial connect of both channels with the current config.
    pub async fn connect_all(&self) {
        for source in [WeightSource::Controller, WeightSource::Scale] {
            let mut ingestor = self.channel(source).ingestor.lock().await;
            self.connect(source, &mut ingestor).await;
        }
    }

    /// Operator-requested reconnect with unchanged config.
    pub async fn reconnect(&self, source: WeightSource) -> ConnectionState {
        let mut ingestor = self.channel(source).ingestor.lock().await;
        self.cycle(source, &mut ingestor).await
    }

    pub async fn disconnect_all(&self) {
        for source in [WeightSource::Controller, WeightSource::Scale] {
            self.channel(source).ingestor.lock().await.disconnect();
        }
    }

    /// disconnect, cooldown, forget the old sample, connect.
    async fn cycle(&self, source: WeightSource, ingestor: &mut SensorIngestor) -> ConnectionState {
        tracing::info!(channel = %source, cooldown_ms = self.cooldown_ms(), "reconnecting channel");
        ingestor.disconnect();
        tokio::time::sleep(self.cooldown).await;
        self.engine.clear(source);
        self.connect(source, ingestor).await
    }

    async fn connect(&self, source: WeightSource, ingestor: &mut SensorIngestor) -> ConnectionState {
        match source {
            WeightSource::Controller => {
                let cfg = self.controller_cfg.load_full();
                ingestor
                    .connect(
                        ChannelSettings::controller(&cfg),
                        self.connectors.controller(&cfg),
                    )
                    .await
            }
            WeightSource::Scale => {
                let cfg = self.scale_cfg.load_full();
                ingestor
                    .connect(ChannelSettings::scale(&cfg), self.connectors.scale(&cfg))
                    .await
            }
        }
    }

    fn cooldown_ms(&self) -> u64 {
        u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use lwd_config::SimulationPatch;
    use lwd_ingest::{FrameStream, IngestEvent, TransportConnector, TransportError};
    use lwd_schemas::{DisagreementPolicy, Grams, WeightSample};
    use lwd_sync::{SyncError, SyncPayload, SyncTarget};
    use tokio::sync::mpsc;

    use super::*;

    struct Refusing;

    #[async_trait]
    impl TransportConnector for Refusing {
        fn describe(&self) -> String {
            "refusing".to_string()
        }

        async fn open(&self) -> Result<Box<dyn FrameStream>, TransportError> {
            Err(TransportError::Unavailable {
                target: "refusing".to_string(),
                reason: "no hardware in tests".to_string(),
            })
        }
    }

    struct NoHardware;

    impl ConnectorFactory for NoHardware {
        fn controller(&self, _: &ControllerChannelConfig) -> Box<dyn TransportConnector> {
            Box::new(Refusing)
        }

        fn scale(&self, _: &ScaleChannelConfig) -> Box<dyn TransportConnector> {
            Box::new(Refusing)
        }
    }

    struct Discard;

    #[async_trait]
    impl SyncTarget for Discard {
        async fn deliver(&self, _: &SyncPayload, _: &SyncConfig) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn controller() -> (ConfigController, Arc<ReconciliationEngine>, mpsc::Receiver<IngestEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::new(ReconciliationEngine::default());
        let ctl = ConfigController::new(ControllerParts {
            controller_cfg: ControllerChannelConfig::default(),
            scale_cfg: ScaleChannelConfig::default(),
            controller: SensorIngestor::new(WeightSource::Controller, tx.clone()),
            scale: SensorIngestor::new(WeightSource::Scale, tx),
            connectors: Arc::new(NoHardware),
            engine: engine.clone(),
            sync: Arc::new(SyncForwarder::new(SyncConfig::default(), Arc::new(Discard))),
            cooldown: Duration::from_millis(500),
        });
        (ctl, engine, rx)
    }

    fn sample(source: WeightSource) -> WeightSample {
        WeightSample {
            source,
            value: Grams::new(12_000),
            stable: true,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transport_update_cycles_only_that_channel() {
        let (ctl, engine, _rx) = controller();
        ctl.connect_all().await;
        assert_eq!(ctl.channel_generation(WeightSource::Controller), 1);
        assert_eq!(ctl.channel_generation(WeightSource::Scale), 1);

        engine.record(sample(WeightSource::Controller));
        engine.record(sample(WeightSource::Scale));

        let started = tokio::time::Instant::now();
        let patch = ControllerChannelPatch {
            topic: Some("line2/weight".to_string()),
            ..Default::default()
        };
        let cfg = ctl.update_controller(&patch).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(cfg.topic, "line2/weight");
        assert_eq!(ctl.controller().topic, "line2/weight");
        assert_eq!(ctl.channel_generation(WeightSource::Controller), 2);
        assert_eq!(ctl.channel_generation(WeightSource::Scale), 1);
        assert_eq!(ctl.channel_state(WeightSource::Controller), ConnectionState::Simulated);
        assert!(engine.latest(WeightSource::Controller).is_none());
        assert!(engine.latest(WeightSource::Scale).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_patch_leaves_config_and_channel_alone() {
        let (ctl, _engine, _rx) = controller();
        ctl.connect_all().await;

        let patch = ScaleChannelPatch {
            simulation: Some(SimulationPatch {
                interval_ms: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ctl.update_scale(&patch).await.unwrap_err();
        assert!(err.to_string().contains("scale.simulation.interval_ms"), "{err}");
        assert_eq!(*ctl.scale(), ScaleChannelConfig::default());
        assert_eq!(ctl.channel_generation(WeightSource::Scale), 1);
    }

    #[tokio::test]
    async fn tolerance_and_sync_updates_swap_in_place() {
        let (ctl, engine, _rx) = controller();

        let policy = ctl
            .update_tolerance(&TolerancePatch {
                tolerance: Some(Grams::new(80)),
                on_disagreement: Some(DisagreementPolicy::Block),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(policy.tolerance, Grams::new(80));
        assert_eq!(engine.policy().on_disagreement, DisagreementPolicy::Block);

        assert!(ctl
            .update_tolerance(&TolerancePatch {
                tolerance: Some(Grams::new(-1)),
                ..Default::default()
            })
            .await
            .is_err());
        assert_eq!(engine.policy().tolerance, Grams::new(80));

        let sync = ctl
            .update_sync(&SyncPatch {
                max_attempts: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sync.max_attempts, 7);
        assert_eq!(ctl.snapshot().sync.max_attempts, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_reconnect_bumps_generation() {
        let (ctl, _engine, _rx) = controller();
        ctl.connect_all().await;
        let state = ctl.reconnect(WeightSource::Scale).await;
        assert_eq!(state, ConnectionState::Simulated);
        assert_eq!(ctl.channel_generation(WeightSource::Scale), 2);
    }
}
