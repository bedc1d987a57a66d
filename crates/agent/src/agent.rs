//! Agent lifecycle: startup wiring and graceful shutdown.
//!
//! Startup: staging directories, one-shot capability probe, registration,
//! sync loop. Shutdown on SIGINT/SIGTERM cancels the running job first so
//! its terminal finalization can still reach the orchestrator, then stops
//! the sync loop and sends a best-effort OFFLINE farewell.

use crate::client::{ClientError, OrchestratorClient};
use crate::executor::JobExecutor;
use crate::models::{HardwareStats, SyncPayload, WorkerCapabilities, WorkerStatus};
use crate::probe::{self, ProbeError};
use crate::slot::JobSlot;
use crate::sync::SyncController;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use transcode_worker_config::Settings;
use tracing::{debug, info, warn};

/// How long a cancelled job gets to finalize before the sync loop is torn
/// down anyway
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Error type for agent startup; all variants are fatal to the process
#[derive(Debug, Error)]
pub enum AgentError {
    /// Capability probe failed at startup
    #[error("Capability probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Registration exhausted its retries or the client could not be built
    #[error("Orchestrator client error: {0}")]
    Client(#[from] ClientError),

    /// Staging directory creation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the components together and owns the shutdown path
pub struct Agent {
    settings: Settings,
    client: Arc<OrchestratorClient>,
    slot: Arc<JobSlot>,
    capabilities: WorkerCapabilities,
}

impl Agent {
    /// Initialize the agent.
    ///
    /// Startup sequence:
    /// 1. Create the staging root
    /// 2. Enumerate transcoder capabilities (cached for process lifetime)
    /// 3. Build the orchestrator client
    ///
    /// Any failure here aborts the process with a non-zero exit.
    pub async fn new(settings: Settings) -> Result<Self, AgentError> {
        std::fs::create_dir_all(&settings.temp_dir)?;

        let capabilities = probe::enumerate_capabilities().await?;
        info!(
            codecs = ?capabilities.supported_codecs,
            has_gpu = capabilities.has_gpu,
            gpu_type = capabilities.gpu_type.as_deref().unwrap_or("none"),
            "Transcoder capabilities discovered"
        );

        let client = Arc::new(OrchestratorClient::new(
            &settings.orchestrator_url,
            &settings.worker_id,
        )?);

        Ok(Self {
            settings,
            client,
            slot: Arc::new(JobSlot::new()),
            capabilities,
        })
    }

    /// Run until an interrupt or terminate signal arrives.
    ///
    /// Registration happens first; its failure (after the client's retry
    /// policy is exhausted) is a startup failure.
    pub async fn run(&self) -> Result<(), AgentError> {
        self.client.register(&self.capabilities).await?;
        info!(worker_id = %self.settings.worker_id, "Registered with orchestrator");

        let job_root = CancellationToken::new();
        let sync_stop = CancellationToken::new();

        let executor = Arc::new(JobExecutor::new(
            self.client.clone(),
            self.slot.clone(),
            PathBuf::from(&self.settings.nas_mount_path),
            PathBuf::from(&self.settings.temp_dir),
        ));
        let controller = SyncController::new(
            self.client.clone(),
            self.slot.clone(),
            executor,
            self.capabilities.clone(),
            self.settings.sync_interval(),
            job_root,
        );

        let sync_handle = {
            let stop = sync_stop.clone();
            tokio::spawn(async move { controller.run(stop).await })
        };

        shutdown_signal().await;
        info!("Shutdown signal received, stopping gracefully");

        // Cancel the running job first: the executor then gets a window to
        // push its terminal FAILED finalization while the sync loop is
        // still alive.
        if self.slot.cancel_current() {
            info!("Cancelling current job");
            wait_for_drain(&self.slot, SHUTDOWN_DRAIN_TIMEOUT).await;
        }

        sync_stop.cancel();
        let _ = sync_handle.await;

        // Best-effort farewell; the orchestrator rediscovers us on the
        // next registration anyway.
        let farewell = SyncPayload {
            worker_id: self.settings.worker_id.clone(),
            status: WorkerStatus::Offline,
            hardware_stats: HardwareStats::new(0.0, 0.0),
            current_job_id: None,
        };
        if let Err(e) = self.client.sync(&farewell).await {
            debug!(error = %e, "OFFLINE farewell not delivered");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Poll until the job slot is empty or the deadline passes
async fn wait_for_drain(slot: &JobSlot, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !slot.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            warn!("Job did not finalize within the shutdown grace period");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_drain_returns_when_slot_clears() {
        let slot = Arc::new(JobSlot::new());
        slot.try_occupy("draining", CancellationToken::new());

        let slot_clone = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slot_clone.clear();
        });

        let start = std::time::Instant::now();
        wait_for_drain(&slot, Duration::from_secs(5)).await;
        assert!(slot.is_empty());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_for_drain_gives_up_at_deadline() {
        let slot = JobSlot::new();
        slot.try_occupy("stuck", CancellationToken::new());

        let start = std::time::Instant::now();
        wait_for_drain(&slot, Duration::from_millis(200)).await;
        // Returned despite the occupant
        assert!(!slot.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_for_drain_empty_slot_is_immediate() {
        let slot = JobSlot::new();
        let start = std::time::Instant::now();
        wait_for_drain(&slot, Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
