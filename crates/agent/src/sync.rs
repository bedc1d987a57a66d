//! Periodic bidirectional sync with the orchestrator.
//!
//! One request per tick carries status and telemetry and may bring back a
//! job assignment, replacing the legacy heartbeat + job-poll pair. The
//! orchestrator rebuilds its worker table lazily: when it answers 404 the
//! controller re-registers and retries the sync once within the same tick.

use crate::client::{ClientError, OrchestratorClient};
use crate::executor::JobExecutor;
use crate::models::{HardwareStats, JobSpec, SyncPayload, WorkerCapabilities, WorkerStatus};
use crate::probe::{self, ProbeError};
use crate::slot::JobSlot;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound for one load snapshot (sampling window included)
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for a single sync tick; every variant is tick-local
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Load snapshot failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Sync request failed: {0}")]
    Client(#[from] ClientError),
}

/// Derive the reported status for one tick.
///
/// A running job wins; an overloaded host reports BUSY without a job id;
/// otherwise the worker is IDLE. OFFLINE is only ever sent by the
/// supervisor during voluntary shutdown.
pub fn derive_status(current_job_id: Option<&str>, stats: &HardwareStats) -> WorkerStatus {
    if current_job_id.is_some() || stats.is_busy {
        WorkerStatus::Busy
    } else {
        WorkerStatus::Idle
    }
}

/// Owns the sync loop and job acceptance
pub struct SyncController {
    client: Arc<OrchestratorClient>,
    slot: Arc<JobSlot>,
    executor: Arc<JobExecutor>,
    capabilities: WorkerCapabilities,
    interval: Duration,
    /// Root from which per-job cancel tokens are derived
    job_root: CancellationToken,
}

impl SyncController {
    pub fn new(
        client: Arc<OrchestratorClient>,
        slot: Arc<JobSlot>,
        executor: Arc<JobExecutor>,
        capabilities: WorkerCapabilities,
        interval: Duration,
        job_root: CancellationToken,
    ) -> Self {
        Self {
            client,
            slot,
            executor,
            capabilities,
            interval,
            job_root,
        }
    }

    /// Tick until `stop` fires. Tick failures are logged and the loop
    /// continues; the next tick re-announces this worker regardless of
    /// what the orchestrator remembers.
    pub async fn run(&self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so the
        // initial registration isn't followed by an instant sync.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Sync loop started");
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Sync tick failed, will retry next tick");
                    }
                }
            }
        }
        info!("Sync loop stopped");
    }

    /// One tick: snapshot, derive, sync, maybe accept an assignment
    async fn tick(&self) -> Result<(), SyncError> {
        let stats = tokio::time::timeout(SNAPSHOT_TIMEOUT, probe::snapshot_load())
            .await
            .map_err(|_| ProbeError::ProbeFailed("load snapshot timed out".to_string()))??;

        let current_job_id = self.slot.current_job_id();
        let payload = SyncPayload {
            worker_id: self.client.worker_id().to_string(),
            status: derive_status(current_job_id.as_deref(), &stats),
            hardware_stats: stats,
            current_job_id,
        };
        debug!(status = %payload.status, cpu = stats.cpu_percent, ram = stats.ram_percent, "Syncing");

        let response = match self.client.sync(&payload).await {
            Ok(response) => response,
            Err(ClientError::StateLoss) => {
                // Orchestrator restarted and forgot us: re-register, then
                // retry the sync exactly once within this tick.
                info!("Orchestrator lost worker state, re-registering");
                self.client.register(&self.capabilities).await?;
                self.client.sync(&payload).await?
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(job) = response.assigned_job {
            self.accept(job);
        }

        Ok(())
    }

    /// Accept an assignment if the slot is free; the slot invariant wins
    /// over the orchestrator's opinion.
    fn accept(&self, job: JobSpec) {
        let cancel = self.job_root.child_token();
        if !self.slot.try_occupy(&job.job_id, cancel.clone()) {
            warn!(
                job_id = %job.job_id,
                current = ?self.slot.current_job_id(),
                "Rejecting assignment: a job is already running"
            );
            return;
        }

        info!(job_id = %job.job_id, "Assignment accepted");
        let executor = self.executor.clone();
        // Run asynchronously so the sync loop keeps ticking BUSY
        // heartbeats while the job executes.
        tokio::spawn(async move {
            executor.run(job, cancel).await;
        });
    }
}
