//! Delivery boundary for the external system.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lwd_bus::CapturePublished;
use lwd_config::SyncConfig;
use lwd_schemas::Grams;

/// Body posted for each capture. Weights are kilograms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub tag_id: String,
    pub weight: Grams,
    pub tare_weight: Grams,
    pub net_weight: Grams,
    pub lorry_number: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&CapturePublished> for SyncPayload {
    fn from(c: &CapturePublished) -> Self {
        Self {
            tag_id: c.record.tag_id.clone(),
            weight: c.record.final_weight,
            tare_weight: c.record.tare_weight,
            net_weight: c.record.net_weight,
            lorry_number: c.lorry_number.clone(),
            timestamp: c.record.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("sync misconfigured: {0}")]
    Config(String),
    #[error("sync transport error: {0}")]
    Transport(String),
    #[error("sync endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl SyncError {
    /// Transport faults, 5xx and 429 are worth retrying. Misconfiguration and
    /// other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Config(_) => false,
            SyncError::Transport(_) => true,
            SyncError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

#[async_trait]
pub trait SyncTarget: Send + Sync {
    async fn deliver(&self, payload: &SyncPayload, cfg: &SyncConfig) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// POSTs JSON to `cfg.endpoint`, with a bearer token read from the env var
/// named by `cfg.api_key_env` when set.
#[derive(Clone, Default)]
pub struct HttpSyncTarget {
    client: reqwest::Client,
}

impl HttpSyncTarget {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncTarget for HttpSyncTarget {
    async fn deliver(&self, payload: &SyncPayload, cfg: &SyncConfig) -> Result<(), SyncError> {
        let mut req = self
            .client
            .post(&cfg.endpoint)
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .json(payload);

        if let Some(var) = &cfg.api_key_env {
            let key = std::env::var(var)
                .map_err(|_| SyncError::Config(format!("env var {var} is not set")))?;
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_camel_case_kilograms() {
        let p = SyncPayload {
            tag_id: "T-1".to_string(),
            weight: Grams::new(12_000),
            tare_weight: Grams::new(150),
            net_weight: Grams::new(11_850),
            lorry_number: "KA-01".to_string(),
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["tagId"], "T-1");
        assert_eq!(v["weight"], 12.0);
        assert_eq!(v["tareWeight"], 0.15);
        assert_eq!(v["netWeight"], 11.85);
        assert_eq!(v["lorryNumber"], "KA-01");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn retry_classification() {
        assert!(SyncError::Transport("reset".into()).is_retryable());
        assert!(SyncError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(SyncError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!SyncError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!SyncError::Config("x".into()).is_retryable());
    }
}
