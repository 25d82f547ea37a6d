use std::sync::Mutex;

use async_trait::async_trait;

use lwd_config::SyncConfig;
use lwd_sync::{SyncError, SyncPayload, SyncTarget};

/// Keeps every delivered payload. The first `fail_first` deliveries return
/// a retryable 503.
#[derive(Debug, Default)]
pub struct RecordingSyncTarget {
    delivered: Mutex<Vec<SyncPayload>>,
    attempts: Mutex<u32>,
    fail_first: u32,
}

impl RecordingSyncTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<SyncPayload> {
        self.delivered
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SyncTarget for RecordingSyncTarget {
    async fn deliver(&self, payload: &SyncPayload, _cfg: &SyncConfig) -> Result<(), SyncError> {
        let attempt = {
            let mut n = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
            *n += 1;
            *n
        };
        if attempt <= self.fail_first {
            return Err(SyncError::Status {
                status: 503,
                body: "scripted outage".to_string(),
            });
        }
        self.delivered
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(payload.clone());
        Ok(())
    }
}
