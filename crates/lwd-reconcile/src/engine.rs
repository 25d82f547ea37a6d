use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use lwd_schemas::{Grams, ReconcilePolicy, ToleranceCheck, WeightSample, WeightSource};

use crate::evaluate::evaluate;

/// Latest-sample state for both sources plus the active policy.
///
/// Each slot has a single writer (the runtime pump for that channel).
/// Checks are computed on request from whatever the slots hold at that
/// moment; nothing is cached.
pub struct ReconciliationEngine {
    controller: RwLock<Option<WeightSample>>,
    scale: RwLock<Option<WeightSample>>,
    policy: ArcSwap<ReconcilePolicy>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(ReconcilePolicy::default())
    }
}

impl ReconciliationEngine {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            controller: RwLock::new(None),
            scale: RwLock::new(None),
            policy: ArcSwap::from_pointee(policy),
        }
    }

    fn slot(&self, source: WeightSource) -> &RwLock<Option<WeightSample>> {
        match source {
            WeightSource::Controller => &self.controller,
            WeightSource::Scale => &self.scale,
        }
    }

    /// Replace the latest sample for `sample.source`.
    pub fn record(&self, sample: WeightSample) {
        let mut slot = self
            .slot(sample.source)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(sample);
    }

    pub fn latest(&self, source: WeightSource) -> Option<WeightSample> {
        self.slot(source)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Forget the latest sample for one source (reconnect path).
    pub fn clear(&self, source: WeightSource) {
        let mut slot = self
            .slot(source)
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.take().is_some() {
            tracing::debug!(channel = %source, "latest sample cleared");
        }
    }

    pub fn policy(&self) -> Arc<ReconcilePolicy> {
        self.policy.load_full()
    }

    /// Takes effect from the next `check`.
    pub fn set_policy(&self, policy: ReconcilePolicy) {
        tracing::info!(
            tolerance = %policy.tolerance,
            priority = %policy.weight_source_priority,
            on_disagreement = %policy.on_disagreement,
            "reconcile policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    pub fn check(&self) -> ToleranceCheck {
        let controller = self.latest_value(WeightSource::Controller);
        let scale = self.latest_value(WeightSource::Scale);
        let policy = self.policy.load();
        evaluate(controller, scale, &policy)
    }

    fn latest_value(&self, source: WeightSource) -> Option<Grams> {
        self.slot(source)
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|s| s.value)
    }
}
