//! Job executor: runs one accepted job end-to-end.
//!
//! Resolves job paths against the NAS mount, fans transcoder progress into
//! a coalescing reporter, invokes the driver, and issues exactly one
//! terminal finalization before clearing the current-job slot.

use crate::client::OrchestratorClient;
use crate::models::{
    JobMetrics, JobOutcome, JobResultPayload, JobSpec, JobStatusPayload, ProgressSample,
};
use crate::slot::JobSlot;
use crate::transcode::TranscoderDriver;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered progress samples between driver and reporter
const PROGRESS_CHANNEL_CAPACITY: usize = 10;

/// Minimum interval between progress reports to the orchestrator
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Lexically normalize a path, collapsing `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Resolve a job-supplied path: absolute paths pass through, relative
/// paths are anchored under the NAS mount.
pub fn resolve_path(nas_mount: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&nas_mount.join(raw.trim_start_matches('/')))
    }
}

/// Manifest URL reported on success: the first rendition's declared
/// destination joined with the master playlist name. Empty-output jobs
/// have no manifest.
pub fn manifest_url_for(job: &JobSpec) -> Option<String> {
    let first = job.outputs.first()?;
    Some(format!(
        "/{}/{}",
        first.dest_path.trim_matches('/'),
        job.master_playlist_name()
    ))
}

/// Executes one job at a time on behalf of the sync controller
pub struct JobExecutor {
    client: Arc<OrchestratorClient>,
    driver: TranscoderDriver,
    slot: Arc<JobSlot>,
    nas_mount: PathBuf,
}

impl JobExecutor {
    pub fn new(
        client: Arc<OrchestratorClient>,
        slot: Arc<JobSlot>,
        nas_mount: PathBuf,
        temp_root: PathBuf,
    ) -> Self {
        Self {
            client,
            driver: TranscoderDriver::new(temp_root),
            slot,
            nas_mount,
        }
    }

    /// Run an accepted job to its terminal state.
    ///
    /// The caller has already occupied the slot with this job's id and
    /// cancel token. Exactly one finalization is sent (COMPLETED or
    /// FAILED), then the slot is cleared.
    pub async fn run(&self, job: JobSpec, cancel: CancellationToken) {
        info!(job_id = %job.job_id, outputs = job.outputs.len(), "Job accepted");

        let outcome = self.run_transcode(&job, &cancel).await;
        let total_time_ms = self.slot.elapsed_ms().unwrap_or(0);

        let payload = match outcome {
            Ok(()) => {
                info!(job_id = %job.job_id, total_time_ms, "Job completed");
                JobResultPayload {
                    status: JobOutcome::Completed,
                    manifest_url: manifest_url_for(&job),
                    error_msg: None,
                    metrics: JobMetrics { total_time_ms },
                }
            }
            Err(message) => {
                warn!(job_id = %job.job_id, error = %message, total_time_ms, "Job failed");
                JobResultPayload {
                    status: JobOutcome::Failed,
                    manifest_url: None,
                    error_msg: Some(message),
                    metrics: JobMetrics { total_time_ms },
                }
            }
        };

        if let Err(e) = self.client.finalize_job(&job.job_id, &payload).await {
            error!(job_id = %job.job_id, error = %e, "Failed to finalize job with orchestrator");
        }

        self.slot.clear();
    }

    /// Everything between acceptance and finalization; any Err is the
    /// error_msg of the FAILED report.
    async fn run_transcode(&self, job: &JobSpec, cancel: &CancellationToken) -> Result<(), String> {
        // Resolve and verify the input before any subprocess is spawned
        let input_path = resolve_path(&self.nas_mount, &job.input.source_url);
        if tokio::fs::metadata(&input_path).await.is_err() {
            return Err(format!(
                "input file does not exist: {}",
                input_path.display()
            ));
        }

        // Pre-create destination directories (idempotent)
        let mut dest_dirs = Vec::with_capacity(job.outputs.len());
        for output in &job.outputs {
            let dest = resolve_path(&self.nas_mount, &output.dest_path);
            tokio::fs::create_dir_all(&dest).await.map_err(|e| {
                format!(
                    "failed to create destination directory {}: {}",
                    dest.display(),
                    e
                )
            })?;
            dest_dirs.push(dest);
        }

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let reporter = tokio::spawn(report_progress(
            self.client.clone(),
            job.job_id.clone(),
            progress_rx,
        ));

        let result = self
            .driver
            .execute(job, &input_path, &dest_dirs, cancel, &progress_tx)
            .await;

        // Closing the channel lets the reporter drain and exit
        drop(progress_tx);
        if let Err(e) = reporter.await {
            warn!(job_id = %job.job_id, error = %e, "Progress reporter task failed");
        }

        result.map_err(|e| e.to_string())
    }
}

/// Coalescing progress reporter.
///
/// Every two seconds the most recent buffered sample (if any, and if it
/// shows real progress) becomes one PROCESSING update. Bursts collapse to
/// the newest sample; a stalled transcoder produces no updates.
async fn report_progress(
    client: Arc<OrchestratorClient>,
    job_id: String,
    mut rx: mpsc::Receiver<ProgressSample>,
) {
    loop {
        tokio::time::sleep(REPORT_INTERVAL).await;

        let mut latest: Option<ProgressSample> = None;
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(sample) => latest = Some(sample),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if let Some(sample) = latest.filter(|sample| sample.percent > 0.0) {
            let payload = JobStatusPayload {
                worker_id: client.worker_id().to_string(),
                status: "PROCESSING".to_string(),
                progress: Some(sample.percent),
                current_fps: Some(sample.fps.round() as u32),
                eta_sec: Some(sample.eta_secs),
            };
            debug!(%job_id, percent = sample.percent, fps = sample.fps, "Reporting progress");
            if let Err(e) = client.update_job_status(&job_id, &payload).await {
                warn!(%job_id, error = %e, "Progress update failed");
            }
        }

        if disconnected {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HlsSettings, InputSpec, OutputSpec};

    fn job_with_dest(dest: &str) -> JobSpec {
        JobSpec {
            job_id: "job-x".to_string(),
            movie_id: None,
            input: InputSpec {
                source_url: "movies/in.mkv".to_string(),
                format: None,
            },
            outputs: vec![OutputSpec {
                resolution: "720p".to_string(),
                bitrate: "1500k".to_string(),
                codec: "libx264".to_string(),
                dest_path: dest.to_string(),
                audio_codec: None,
                audio_bitrate: None,
            }],
            hls_settings: HlsSettings::default(),
            audio_config: None,
        }
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize_path(Path::new("/mnt/media/./movies/../films/a.mkv")),
            PathBuf::from("/mnt/media/films/a.mkv")
        );
    }

    #[test]
    fn test_normalize_parent_at_root_is_safe() {
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_resolve_absolute_passes_through() {
        assert_eq!(
            resolve_path(Path::new("/mnt/media"), "/srv/direct/in.mkv"),
            PathBuf::from("/srv/direct/in.mkv")
        );
    }

    #[test]
    fn test_resolve_relative_joins_mount() {
        assert_eq!(
            resolve_path(Path::new("/mnt/media"), "movies/in.mkv"),
            PathBuf::from("/mnt/media/movies/in.mkv")
        );
    }

    #[test]
    fn test_resolve_strips_leading_separator() {
        // A leading slash on an otherwise relative-looking job path would
        // make join() discard the mount; Path::is_absolute catches it
        // first, so exercise the trim via a dot-prefixed form.
        assert_eq!(
            resolve_path(Path::new("/mnt/media"), "./movies/in.mkv"),
            PathBuf::from("/mnt/media/movies/in.mkv")
        );
    }

    #[test]
    fn test_manifest_url_first_output() {
        let job = job_with_dest("hls/film/720p");
        assert_eq!(
            manifest_url_for(&job).as_deref(),
            Some("/hls/film/720p/index.m3u8")
        );
    }

    #[test]
    fn test_manifest_url_trims_separators() {
        let job = job_with_dest("/hls/film/720p/");
        assert_eq!(
            manifest_url_for(&job).as_deref(),
            Some("/hls/film/720p/index.m3u8")
        );
    }

    #[test]
    fn test_manifest_url_custom_playlist_name() {
        let mut job = job_with_dest("hls/film/720p");
        job.hls_settings.master_playlist_name = Some("master.m3u8".to_string());
        assert_eq!(
            manifest_url_for(&job).as_deref(),
            Some("/hls/film/720p/master.m3u8")
        );
    }

    #[test]
    fn test_manifest_url_empty_for_no_outputs() {
        let mut job = job_with_dest("hls/film/720p");
        job.outputs.clear();
        assert_eq!(manifest_url_for(&job), None);
    }

    #[tokio::test]
    async fn test_missing_input_finalizes_failed_and_clears_slot() {
        use tempfile::TempDir;

        let nas = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        // Unroutable orchestrator: finalization is attempted and fails,
        // which must not prevent the slot from being cleared.
        let client = Arc::new(OrchestratorClient::new("http://127.0.0.1:9", "w-test").unwrap());
        let slot = Arc::new(JobSlot::new());
        let executor = JobExecutor::new(
            client,
            slot.clone(),
            nas.path().to_path_buf(),
            temp.path().to_path_buf(),
        );

        let job = job_with_dest("hls/out/720p");
        let cancel = CancellationToken::new();
        assert!(slot.try_occupy(&job.job_id, cancel.clone()));

        let started = std::time::Instant::now();
        executor.run(job, cancel).await;

        assert!(slot.is_empty());
        // No subprocess ran and no staging dir was created
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
        // Bounded by the finalize retry policy, not a transcode
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
