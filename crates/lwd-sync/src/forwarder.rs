use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use lwd_bus::{next_event, DomainEvent, EventBus};
use lwd_config::SyncConfig;

use crate::target::{SyncError, SyncPayload, SyncTarget};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SyncStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time view for status endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    pub enabled: bool,
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Result of forwarding one capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Sync disabled at dispatch time.
    Skipped,
    Failed { attempts: u32, error: SyncError },
}

// ---------------------------------------------------------------------------
// SyncForwarder
// ---------------------------------------------------------------------------

/// Best-effort delivery of captures to the external system.
///
/// Each capture is forwarded on its own task, so a slow or failing endpoint
/// never holds up the capture path or other deliveries. Failures are logged
/// and counted; local state is never touched.
pub struct SyncForwarder {
    config: ArcSwap<SyncConfig>,
    target: Arc<dyn SyncTarget>,
    stats: SyncStats,
}

impl SyncForwarder {
    pub fn new(config: SyncConfig, target: Arc<dyn SyncTarget>) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            target,
            stats: SyncStats::default(),
        }
    }

    pub fn config(&self) -> Arc<SyncConfig> {
        self.config.load_full()
    }

    /// Applies to deliveries dispatched after the swap.
    pub fn set_config(&self, config: SyncConfig) {
        tracing::info!(
            enabled = config.enabled,
            endpoint = %config.endpoint,
            max_attempts = config.max_attempts,
            "sync config updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            enabled: self.config.load().enabled,
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            last_heartbeat: *self
                .stats
                .last_heartbeat
                .lock()
                .unwrap_or_else(|p| p.into_inner()),
            last_error: self
                .stats
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }

    /// Deliver one payload with retry and backoff.
    pub async fn forward(&self, payload: SyncPayload) -> DeliveryOutcome {
        let cfg = self.config.load_full();
        if !cfg.enabled {
            tracing::debug!(tag_id = %payload.tag_id, "sync disabled; capture not forwarded");
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return DeliveryOutcome::Skipped;
        }

        let max = cfg.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.target.deliver(&payload, &cfg).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(tag_id = %payload.tag_id, attempt, "capture synced");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) if e.is_retryable() && attempt < max => {
                    let wait = cfg.backoff_for(attempt);
                    let backoff_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        tag_id = %payload.tag_id,
                        attempt,
                        max_attempts = max,
                        backoff_ms,
                        error = %e,
                        "sync attempt failed; retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    *self
                        .stats
                        .last_error
                        .lock()
                        .unwrap_or_else(|p| p.into_inner()) = Some(e.to_string());
                    tracing::error!(
                        tag_id = %payload.tag_id,
                        attempts = attempt,
                        error = %e,
                        "sync failed; giving up"
                    );
                    return DeliveryOutcome::Failed {
                        attempts: attempt,
                        error: e,
                    };
                }
            }
        }
    }

    /// Subscribe to `capture.created` and forward each on its own task.
    pub fn spawn(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(env) = next_event(&mut rx).await {
                if let DomainEvent::CaptureCreated(capture) = &env.event {
                    let payload = SyncPayload::from(capture);
                    let fwd = Arc::clone(&this);
                    tokio::spawn(async move {
                        fwd.forward(payload).await;
                    });
                }
            }
            tracing::debug!("event bus closed; sync subscriber exiting");
        })
    }

    /// Liveness tick, independent of deliveries. The interval is re-read
    /// from config every tick.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let secs = this.config.load().heartbeat_interval_secs.max(1);
                tokio::time::sleep(Duration::from_secs(secs)).await;
                this.beat();
            }
        })
    }

    fn beat(&self) {
        let now = Utc::now();
        *self
            .stats
            .last_heartbeat
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(now);
        tracing::info!(
            enabled = self.config.load().enabled,
            delivered = self.stats.delivered.load(Ordering::Relaxed),
            failed = self.stats.failed.load(Ordering::Relaxed),
            "sync heartbeat"
        );
    }
}
