//! Hands ingestor output to the engine and the bus.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lwd_bus::{ChannelStatusChange, DomainEvent, EventBus, SampleUpdate};
use lwd_ingest::{ChannelProbe, IngestEvent};
use lwd_reconcile::ReconciliationEngine;
use lwd_schemas::WeightSource;

pub(crate) struct Probes {
    pub controller: ChannelProbe,
    pub scale: ChannelProbe,
}

impl Probes {
    pub fn get(&self, source: WeightSource) -> &ChannelProbe {
        match source {
            WeightSource::Controller => &self.controller,
            WeightSource::Scale => &self.scale,
        }
    }
}

/// Drain the ingest queue until every sender is gone.
///
/// Samples from a superseded generation, or that arrive while their channel
/// is not producing, are dropped before they reach the engine.
pub(crate) fn spawn_pump(
    mut rx: mpsc::Receiver<IngestEvent>,
    probes: Probes,
    engine: Arc<ReconciliationEngine>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let probe = probes.get(event.source());
            let current = probe.generation();
            if event.generation() != current {
                tracing::trace!(
                    channel = %event.source(),
                    generation = event.generation(),
                    current,
                    "dropping stale ingest event"
                );
                continue;
            }

            match event {
                IngestEvent::Sample { sample, .. } => {
                    if !probe.state().is_producing() {
                        continue;
                    }
                    engine.record(sample.clone());
                    let check = engine.check();
                    bus.publish(DomainEvent::SampleUpdated(SampleUpdate { sample, check }));
                }
                IngestEvent::Status {
                    source,
                    generation,
                    state,
                } => {
                    bus.publish(DomainEvent::ChannelStatus(ChannelStatusChange {
                        channel: source,
                        state,
                        generation,
                    }));
                }
            }
        }
        tracing::debug!("ingest queue closed; pump exiting");
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use lwd_config::{ScaleChannelConfig, SimulationConfig};
    use lwd_ingest::{
        ChannelSettings, FrameStream, SensorIngestor, TransportConnector, TransportError,
    };
    use lwd_schemas::{ConnectionState, Grams, WeightSample};

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
                reason: "offline".to_string(),
            })
        }
    }

    fn sample(source: WeightSource, grams: i64) -> WeightSample {
        WeightSample {
            source,
            value: Grams::new(grams),
            stable: true,
            captured_at: Utc::now(),
        }
    }

    /// Settings whose simulator stays quiet for the length of the test.
    fn quiet_scale() -> ChannelSettings {
        let mut cfg = ScaleChannelConfig::default();
        cfg.simulation = SimulationConfig {
            baseline_kg: Grams::new(5_000),
            variance_kg: Grams::ZERO,
            interval_ms: 3_600_000,
        };
        ChannelSettings::scale(&cfg)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generations_never_reach_the_engine() {
        let (tx, rx) = mpsc::channel(16);
        let mut controller = SensorIngestor::new(WeightSource::Controller, tx.clone());
        let mut scale = SensorIngestor::new(WeightSource::Scale, tx.clone());
        let engine = Arc::new(ReconciliationEngine::default());
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();

        let probes = Probes {
            controller: controller.probe(),
            scale: scale.probe(),
        };
        let pump = spawn_pump(rx, probes, engine.clone(), bus.clone());

        scale.connect(quiet_scale(), Box::new(Refusing)).await;
        scale.connect(quiet_scale(), Box::new(Refusing)).await;
        assert_eq!(scale.generation(), 2);
        assert_eq!(scale.state(), ConnectionState::Simulated);

        // Drain whatever the two connects produced.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        engine.clear(WeightSource::Scale);
        while events.try_recv().is_ok() {}

        tx.send(IngestEvent::Sample {
            generation: 1,
            sample: sample(WeightSource::Scale, 9_999),
        })
        .await
        .unwrap();
        tx.send(IngestEvent::Sample {
            generation: 2,
            sample: sample(WeightSource::Scale, 12_345),
        })
        .await
        .unwrap();
        // Controller never connected: generation 0 but not producing.
        tx.send(IngestEvent::Sample {
            generation: 0,
            sample: sample(WeightSource::Controller, 1_000),
        })
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(
            engine.latest(WeightSource::Scale).map(|s| s.value),
            Some(Grams::new(12_345))
        );
        assert!(engine.latest(WeightSource::Controller).is_none());

        let env = events.try_recv().unwrap();
        match env.event {
            DomainEvent::SampleUpdated(u) => {
                assert_eq!(u.sample.value, Grams::new(12_345));
                assert_eq!(u.check.scale_weight, Some(Grams::new(12_345)));
            }
            other => panic!("unexpected event {}", other.kind()),
        }
        assert!(events.try_recv().is_err());

        controller.disconnect();
        pump.abort();
    }
}
