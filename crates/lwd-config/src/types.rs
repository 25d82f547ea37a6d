//! Typed configuration records and their optional-field patches.
//!
//! Each category has a full record (`*Config`) and a patch (`*Patch`) whose
//! fields are all `Option`. `Patch::apply_to` produces a new record; the base
//! is never mutated, so callers can validate the result before swapping it in.

use std::time::Duration;

use chrono_tz::Tz;
use lwd_schemas::{DisagreementPolicy, Grams, ReconcilePolicy, WeightBasis};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ConfigError;

/// Simulator intervals below this are rejected.
pub const MIN_SIMULATION_INTERVAL_MS: u64 = 50;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Field-wise merge of an optional-field patch onto a full record.
pub trait Patch {
    type Target;

    fn apply_to(&self, base: &Self::Target) -> Self::Target;
}

pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub controller: ControllerChannelConfig,
    pub scale: ScaleChannelConfig,
    pub sync: SyncConfig,
    pub tolerance: ReconcilePolicy,
    pub session: SessionConfig,
    pub runtime: RuntimeConfig,
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.site.validate()?;
        self.controller.validate()?;
        self.scale.validate()?;
        self.sync.validate()?;
        self.tolerance.validate()?;
        self.runtime.validate()
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// IANA timezone defining the operating day (tare lookups).
    pub timezone: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

impl SiteConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::invalid("site.timezone", format!("unknown timezone '{}'", self.timezone)))
    }
}

impl Validate for SiteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.tz().map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Synthetic sample generation used when hardware is unavailable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub baseline_kg: Grams,
    /// Half-width of the uniform band around the baseline.
    pub variance_kg: Grams,
    pub interval_ms: u64,
}

impl SimulationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate_at(&self, section: &str) -> Result<(), ConfigError> {
        if self.variance_kg.is_negative() {
            return Err(ConfigError::invalid(
                format!("{section}.simulation.variance_kg"),
                "must be >= 0",
            ));
        }
        if self.interval_ms < MIN_SIMULATION_INTERVAL_MS {
            return Err(ConfigError::invalid(
                format!("{section}.simulation.interval_ms"),
                format!("must be >= {MIN_SIMULATION_INTERVAL_MS}"),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationPatch {
    pub baseline_kg: Option<Grams>,
    pub variance_kg: Option<Grams>,
    pub interval_ms: Option<u64>,
}

impl Patch for SimulationPatch {
    type Target = SimulationConfig;

    fn apply_to(&self, base: &SimulationConfig) -> SimulationConfig {
        SimulationConfig {
            baseline_kg: self.baseline_kg.unwrap_or(base.baseline_kg),
            variance_kg: self.variance_kg.unwrap_or(base.variance_kg),
            interval_ms: self.interval_ms.unwrap_or(base.interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller channel
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerChannelConfig {
    /// When false the channel goes straight to simulated mode.
    pub enabled: bool,
    /// Pub/sub broker WebSocket URL.
    pub url: String,
    pub topic: String,
    pub probe_timeout_ms: u64,
    pub simulation: SimulationConfig,
}

impl Default for ControllerChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "ws://127.0.0.1:9001/ws".to_string(),
            topic: "plc/weight".to_string(),
            probe_timeout_ms: 10_000,
            simulation: SimulationConfig {
                baseline_kg: Grams::new(12_000),
                variance_kg: Grams::new(100),
                interval_ms: 1_000,
            },
        }
    }
}

impl Validate for ControllerChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.url.trim().is_empty() {
            return Err(ConfigError::invalid("controller.url", "required when enabled"));
        }
        if self.topic.trim().is_empty() {
            return Err(ConfigError::invalid("controller.topic", "must not be empty"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::invalid("controller.probe_timeout_ms", "must be > 0"));
        }
        self.simulation.validate_at("controller")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerChannelPatch {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub topic: Option<String>,
    pub probe_timeout_ms: Option<u64>,
    pub simulation: Option<SimulationPatch>,
}

impl Patch for ControllerChannelPatch {
    type Target = ControllerChannelConfig;

    fn apply_to(&self, base: &ControllerChannelConfig) -> ControllerChannelConfig {
        ControllerChannelConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            url: self.url.clone().unwrap_or_else(|| base.url.clone()),
            topic: self.topic.clone().unwrap_or_else(|| base.topic.clone()),
            probe_timeout_ms: self.probe_timeout_ms.unwrap_or(base.probe_timeout_ms),
            simulation: match &self.simulation {
                Some(p) => p.apply_to(&base.simulation),
                None => base.simulation.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Scale channel
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaleChannelConfig {
    pub enabled: bool,
    /// `host:port` of the line-stream bridge.
    pub address: String,
    pub probe_timeout_ms: u64,
    pub simulation: SimulationConfig,
}

impl Default for ScaleChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:4001".to_string(),
            probe_timeout_ms: 10_000,
            simulation: SimulationConfig {
                baseline_kg: Grams::new(12_000),
                variance_kg: Grams::new(50),
                interval_ms: 1_500,
            },
        }
    }
}

impl Validate for ScaleChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.address.trim().is_empty() {
            return Err(ConfigError::invalid("scale.address", "required when enabled"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::invalid("scale.probe_timeout_ms", "must be > 0"));
        }
        self.simulation.validate_at("scale")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScaleChannelPatch {
    pub enabled: Option<bool>,
    pub address: Option<String>,
    pub probe_timeout_ms: Option<u64>,
    pub simulation: Option<SimulationPatch>,
}

impl Patch for ScaleChannelPatch {
    type Target = ScaleChannelConfig;

    fn apply_to(&self, base: &ScaleChannelConfig) -> ScaleChannelConfig {
        ScaleChannelConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            address: self.address.clone().unwrap_or_else(|| base.address.clone()),
            probe_timeout_ms: self.probe_timeout_ms.unwrap_or(base.probe_timeout_ms),
            simulation: match &self.simulation {
                Some(p) => p.apply_to(&base.simulation),
                None => base.simulation.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// External sync
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Name of the env var holding the API key. The key itself never lives
    /// in config.
    pub api_key_env: Option<String>,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key_env: None,
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            request_timeout_ms: 10_000,
            heartbeat_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Backoff before retry number `attempt` (1-based count of failures so far).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("sync.endpoint", "required when enabled"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("sync.max_attempts", "must be >= 1"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid("sync.heartbeat_interval_secs", "must be > 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("sync.request_timeout_ms", "must be > 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncPatch {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    /// Absent keeps the current value; an explicit `null` clears it.
    #[serde(
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key_env: Option<Option<String>>,
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
}

impl Patch for SyncPatch {
    type Target = SyncConfig;

    fn apply_to(&self, base: &SyncConfig) -> SyncConfig {
        SyncConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            endpoint: self.endpoint.clone().unwrap_or_else(|| base.endpoint.clone()),
            api_key_env: self
                .api_key_env
                .clone()
                .unwrap_or_else(|| base.api_key_env.clone()),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_backoff_ms: self.base_backoff_ms.unwrap_or(base.base_backoff_ms),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(base.max_backoff_ms),
            request_timeout_ms: self.request_timeout_ms.unwrap_or(base.request_timeout_ms),
            heartbeat_interval_secs: self
                .heartbeat_interval_secs
                .unwrap_or(base.heartbeat_interval_secs),
        }
    }
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present_or_null<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

// ---------------------------------------------------------------------------
// Tolerance policy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TolerancePatch {
    pub tolerance: Option<Grams>,
    pub weight_source_priority: Option<WeightBasis>,
    pub on_disagreement: Option<DisagreementPolicy>,
}

impl Patch for TolerancePatch {
    type Target = ReconcilePolicy;

    fn apply_to(&self, base: &ReconcilePolicy) -> ReconcilePolicy {
        ReconcilePolicy {
            tolerance: self.tolerance.unwrap_or(base.tolerance),
            weight_source_priority: self
                .weight_source_priority
                .unwrap_or(base.weight_source_priority),
            on_disagreement: self.on_disagreement.unwrap_or(base.on_disagreement),
        }
    }
}

impl Validate for ReconcilePolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tolerance.is_negative() {
            return Err(ConfigError::invalid("tolerance.tolerance", "must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session + runtime
// ---------------------------------------------------------------------------

/// What happens to capture records when their session is removed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureRetention {
    #[default]
    Retain,
    Purge,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub on_remove: CaptureRetention,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Pause between disconnect and reconnect on a transport update.
    pub reconnect_cooldown_ms: u64,
    pub event_bus_capacity: usize,
    pub ingest_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reconnect_cooldown_ms: 500,
            event_bus_capacity: 1024,
            ingest_queue_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_bus_capacity == 0 {
            return Err(ConfigError::invalid("runtime.event_bus_capacity", "must be > 0"));
        }
        if self.ingest_queue_capacity == 0 {
            return Err(ConfigError::invalid("runtime.ingest_queue_capacity", "must be > 0"));
        }
        Ok(())
    }
}
