//! Startup glue shared by `main.rs` and tests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use lwd_config::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
use lwd_db::{PgStore, ENV_DB_URL};
use lwd_ingest::HardwareConnectors;
use lwd_runtime::{Runtime, RuntimeDeps};
use lwd_session::{MemoryStore, SessionStore};
use lwd_sync::HttpSyncTarget;

use crate::state::AppState;

pub const ENV_CONFIG: &str = "LWD_CONFIG";
pub const ENV_DAEMON_ADDR: &str = "LWD_DAEMON_ADDR";

/// Layered YAML, later files overriding earlier ones. No files means
/// built-in defaults.
pub fn load_config(paths: &[PathBuf]) -> anyhow::Result<LoadedConfig> {
    if paths.is_empty() {
        return load_layered_yaml_from_strings(&[]).context("default config is invalid");
    }
    let owned: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
    load_layered_yaml(&refs)
}

/// Postgres when `LWD_DATABASE_URL` is set, otherwise an in-memory store.
pub async fn open_store() -> anyhow::Result<Arc<dyn SessionStore>> {
    if std::env::var(ENV_DB_URL).is_err() {
        tracing::warn!("{ENV_DB_URL} not set; sessions are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = lwd_db::connect_from_env().await?;
    lwd_db::migrate(&pool).await?;
    Ok(Arc::new(PgStore::new(pool)))
}

/// Start the runtime against real hardware connectors and HTTP sync.
pub async fn start_runtime(
    loaded: &LoadedConfig,
    store: Arc<dyn SessionStore>,
    sim_seed: Option<u64>,
) -> anyhow::Result<AppState> {
    let runtime = Runtime::start(
        &loaded.config,
        RuntimeDeps {
            store,
            connectors: Arc::new(HardwareConnectors),
            sync_target: Arc::new(HttpSyncTarget::new()),
            sim_seed,
        },
    )
    .await
    .context("runtime failed to start")?;
    Ok(AppState::new(Arc::new(runtime), loaded.config_hash.clone()))
}
