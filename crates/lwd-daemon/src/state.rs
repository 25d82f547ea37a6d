//! Shared state for lwd-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything stateful
//! lives in the runtime; this module only adds process metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lwd_runtime::Runtime;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: String,
    pub version: String,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            service: "lwd-daemon".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub build: BuildInfo,
    /// Hash of the config the process booted with.
    pub config_hash: String,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, config_hash: impl Into<String>) -> Self {
        Self {
            runtime,
            build: BuildInfo::default(),
            config_hash: config_hash.into(),
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
