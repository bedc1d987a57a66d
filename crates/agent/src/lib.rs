//! Transcode Worker Agent
//!
//! Control loop for a transcoding worker: periodic state sync with a
//! remote orchestrator, serial job execution against an external ffmpeg
//! process, staged HLS output committed atomically per file to a shared
//! store, and graceful signal-driven shutdown.

pub mod agent;
pub mod client;
pub mod executor;
pub mod models;
pub mod probe;
pub mod slot;
pub mod sync;
pub mod transcode;

pub use transcode_worker_config as config;
pub use transcode_worker_config::{Settings, SettingsError};

pub use agent::{Agent, AgentError};
pub use client::{ClientError, OrchestratorClient};
pub use executor::{manifest_url_for, normalize_path, resolve_path, JobExecutor};
pub use models::{
    HardwareStats, JobOutcome, JobResultPayload, JobSpec, JobStatusPayload, ProgressSample,
    RegistrationPayload, SyncPayload, SyncResponse, WorkerCapabilities, WorkerStatus,
};
pub use probe::{enumerate_capabilities, snapshot_load, ProbeError};
pub use slot::{ActiveJob, JobSlot};
pub use sync::{derive_status, SyncController, SyncError};
pub use transcode::{TranscodeError, TranscodeStage, TranscoderDriver};
