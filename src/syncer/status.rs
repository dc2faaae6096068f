//! Status write-back.
//!
//! The syncer merges the reports of every gateway and hands them to a
//! [`StatusWriter`] on a background task. Writes are retried with exponential
//! backoff and never block translation.

use crate::config::SyncerConfig;
use crate::errors::{GantryError, Result};
use crate::observability::MetricsRecorder;
use crate::xds::reports::ReportMap;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Destination of merged status reports.
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write(&self, reports: &ReportMap) -> Result<()>;
}

/// Writes reports to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingStatusWriter;

#[async_trait]
impl StatusWriter for LoggingStatusWriter {
    async fn write(&self, reports: &ReportMap) -> Result<()> {
        let rendered = serde_json::to_string(reports)
            .map_err(|e| GantryError::internal(format!("Failed to render status: {}", e)))?;
        info!(
            gateways = reports.gateways.len(),
            routes = reports.routes.len(),
            status = %rendered,
            "Status report"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncerConfig) -> Self {
        Self {
            max_attempts: config.status_retry_attempts.max(1),
            base_delay_ms: config.status_retry_delay_ms,
            max_delay_ms: config.status_retry_max_delay_ms.max(config.status_retry_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): exponential, capped,
    /// plus up to 10% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = 2u64.saturating_pow(attempt - 1);
        let capped = self.base_delay_ms.saturating_mul(exponential).min(self.max_delay_ms);
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 { rand::thread_rng().gen_range(0..jitter_range) } else { 0 };
        Duration::from_millis(capped + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncerConfig::default())
    }
}

/// Write `reports`, retrying retryable failures. Returns the attempt count on success.
pub async fn write_with_retry(
    writer: &dyn StatusWriter,
    reports: &ReportMap,
    policy: RetryPolicy,
) -> Result<u32> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match writer.write(reports).await {
            Ok(()) => return Ok(attempt),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Status write failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                return Err(GantryError::status_sync(e.to_string(), attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Spawn the task that drains `rx` into `writer`.
///
/// Only the latest queued report matters, so a backlog is collapsed before
/// each write.
pub fn spawn_status_task(
    writer: Arc<dyn StatusWriter>,
    mut rx: mpsc::UnboundedReceiver<ReportMap>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    let metrics = MetricsRecorder::new();
    tokio::spawn(async move {
        while let Some(mut reports) = rx.recv().await {
            while let Ok(newer) = rx.try_recv() {
                reports = newer;
            }
            match write_with_retry(writer.as_ref(), &reports, policy).await {
                Ok(attempts) => {
                    metrics.record_status_write(true, attempts);
                    debug!(attempts, "Status written");
                }
                Err(e) => {
                    let attempts = match &e {
                        GantryError::StatusSync { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    metrics.record_status_write(false, attempts);
                    error!(error = %e, "Giving up on status write");
                }
            }
        }
        debug!("Status channel closed");
    })
}
