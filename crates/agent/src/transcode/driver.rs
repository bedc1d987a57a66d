//! Transcoder driver: full lifecycle of one transcoding job.
//!
//! Stages a per-job temp directory, probes the input's duration, runs one
//! ffmpeg process per rendition with streaming progress extraction, commits
//! staged files to the shared store, and removes the temp directory on
//! every exit path. Cancellation propagates as a termination signal to the
//! running process, escalating to a hard kill after a grace period.

use crate::models::{JobSpec, ProgressSample};
use crate::transcode::command::{build_rendition_command, variant_dir_name};
use crate::transcode::commit::commit_rendition;
use crate::transcode::progress::ProgressParser;
use serde::Deserialize;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a cancelled transcoder gets to honor SIGTERM before SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Stderr lines retained for failure reports
const STDERR_TAIL_LINES: usize = 20;

/// Error type for driver operations. Every variant is job-fatal.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The input could not be probed or read
    #[error("input unusable: {0}")]
    InputUnusable(String),

    /// The transcoder process failed for one rendition
    #[error("transcode failed for {rendition}: {detail}")]
    TranscodeFailed { rendition: String, detail: String },

    /// Staged files could not be committed to the shared store
    #[error("commit failed for {rendition}: {source}")]
    CommitFailed {
        rendition: String,
        source: io::Error,
    },

    /// The job was cancelled cooperatively
    #[error("job cancelled")]
    Cancelled,

    /// Filesystem error during staging
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-job pipeline stage, surfaced in structured logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStage {
    Staging,
    Probing,
    /// Transcoding rendition i
    Transcoding(usize),
    /// Committing rendition i
    Committing(usize),
    Done,
}

impl std::fmt::Display for TranscodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeStage::Staging => write!(f, "staging"),
            TranscodeStage::Probing => write!(f, "probing"),
            TranscodeStage::Transcoding(i) => write!(f, "transcoding[{}]", i),
            TranscodeStage::Committing(i) => write!(f, "committing[{}]", i),
            TranscodeStage::Done => write!(f, "done"),
        }
    }
}

/// Raw ffprobe JSON structure for duration extraction
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Probe the input's total duration in seconds via ffprobe.
///
/// A reported duration of `0` is passed through: progress stays at zero
/// but the transcode proceeds.
pub async fn probe_duration(input: &Path) -> Result<f64, TranscodeError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(input)
        .output()
        .await
        .map_err(|e| TranscodeError::InputUnusable(format!("ffprobe failed to run: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::InputUnusable(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::InputUnusable(format!("unreadable ffprobe output: {}", e)))?;

    let duration = parsed
        .format
        .and_then(|format| format.duration)
        .ok_or_else(|| TranscodeError::InputUnusable("ffprobe reported no duration".to_string()))?;

    duration.trim().parse::<f64>().map_err(|e| {
        TranscodeError::InputUnusable(format!("unparseable duration '{}': {}", duration, e))
    })
}

/// Drives external transcoder processes for one job at a time
pub struct TranscoderDriver {
    temp_root: PathBuf,
}

impl TranscoderDriver {
    /// Create a driver staging under `temp_root`
    pub fn new(temp_root: PathBuf) -> Self {
        Self { temp_root }
    }

    /// Execute one job end-to-end.
    ///
    /// `dest_dirs` holds the resolved destination directory for each entry
    /// of `job.outputs`, in the same order. Progress samples are pushed to
    /// `progress_tx` with non-blocking semantics: when the channel is full
    /// the sample is dropped, since the next one supersedes it.
    ///
    /// The per-job temp directory is removed on every exit path, including
    /// failure and cancellation.
    pub async fn execute(
        &self,
        job: &JobSpec,
        input_path: &Path,
        dest_dirs: &[PathBuf],
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<ProgressSample>,
    ) -> Result<(), TranscodeError> {
        debug_assert_eq!(dest_dirs.len(), job.outputs.len());

        debug!(job_id = %job.job_id, stage = %TranscodeStage::Staging, "Creating staging directory");
        let job_temp_dir = self.temp_root.join(&job.job_id);
        std::fs::create_dir_all(&job_temp_dir)?;

        let result = self
            .run_pipeline(job, input_path, dest_dirs, &job_temp_dir, cancel, progress_tx)
            .await;

        if let Err(e) = std::fs::remove_dir_all(&job_temp_dir) {
            warn!(job_id = %job.job_id, error = %e, "Failed to remove staging directory");
        }

        result
    }

    async fn run_pipeline(
        &self,
        job: &JobSpec,
        input_path: &Path,
        dest_dirs: &[PathBuf],
        job_temp_dir: &Path,
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<ProgressSample>,
    ) -> Result<(), TranscodeError> {
        debug!(job_id = %job.job_id, stage = %TranscodeStage::Probing, "Probing input duration");
        let total_duration = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            result = probe_duration(input_path) => result?,
        };

        for (index, output) in job.outputs.iter().enumerate() {
            let rendition = variant_dir_name(output);
            let staging_dir = job_temp_dir.join(&rendition);
            std::fs::create_dir_all(&staging_dir)?;

            info!(
                job_id = %job.job_id,
                stage = %TranscodeStage::Transcoding(index),
                %rendition,
                codec = %output.codec,
                "Starting rendition transcode"
            );
            let cmd = build_rendition_command(job, output, input_path, &staging_dir);
            run_rendition(cmd, &rendition, total_duration, cancel, progress_tx.clone()).await?;

            info!(
                job_id = %job.job_id,
                stage = %TranscodeStage::Committing(index),
                %rendition,
                "Committing rendition to shared store"
            );
            let dest_dir = dest_dirs[index].clone();
            let staging = staging_dir.clone();
            let committed = tokio::task::spawn_blocking(move || commit_rendition(&staging, &dest_dir))
                .await
                .map_err(|e| io::Error::other(format!("commit task panicked: {}", e)))?
                .map_err(|source| {
                    warn!(
                        job_id = %job.job_id,
                        %rendition,
                        staging = %staging_dir.display(),
                        "Commit failed; staging will be cleaned up"
                    );
                    TranscodeError::CommitFailed {
                        rendition: rendition.clone(),
                        source,
                    }
                })?;

            debug!(job_id = %job.job_id, %rendition, files = committed, "Rendition committed");
        }

        debug!(job_id = %job.job_id, stage = %TranscodeStage::Done, "All renditions committed");
        Ok(())
    }
}

/// Run one rendition's transcoder process to completion.
///
/// The stderr reader runs concurrently with the process, feeding the
/// progress sink and retaining a bounded tail for failure reports.
async fn run_rendition(
    mut cmd: Command,
    rendition: &str,
    total_duration: f64,
    cancel: &CancellationToken,
    progress_tx: mpsc::Sender<ProgressSample>,
) -> Result<(), TranscodeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| TranscodeError::TranscodeFailed {
        rendition: rendition.to_string(),
        detail: format!("failed to spawn transcoder: {}", e),
    })?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TranscodeError::TranscodeFailed {
            rendition: rendition.to_string(),
            detail: "failed to capture transcoder stderr".to_string(),
        })?;

    let reader = tokio::spawn(read_stderr(stderr, total_duration, progress_tx));

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            terminate_child(&mut child).await;
            let _ = reader.await;
            return Err(TranscodeError::Cancelled);
        }
        status = child.wait() => status?,
    };

    let stderr_tail = reader.await.unwrap_or_default();

    if !status.success() {
        return Err(TranscodeError::TranscodeFailed {
            rendition: rendition.to_string(),
            detail: format!("transcoder exited with {}: {}", status, stderr_tail.trim()),
        });
    }

    Ok(())
}

/// Read stderr line-buffered: emit progress samples (dropping when the
/// sink is full) and keep a bounded tail of raw lines.
async fn read_stderr(
    stderr: ChildStderr,
    total_duration: f64,
    progress_tx: mpsc::Sender<ProgressSample>,
) -> String {
    let parser = ProgressParser::new(total_duration);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(sample) = parser.parse_line(&line) {
            let _ = progress_tx.try_send(sample);
        }

        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Deliver a polite termination signal, escalating to a hard kill if the
/// process ignores it past the grace period.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(_) => return,
            Err(_) => warn!("Transcoder ignored SIGTERM, escalating to hard kill"),
        }
    }

    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HlsSettings, InputSpec, OutputSpec};
    use tempfile::TempDir;

    fn shell_command(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn test_job(job_id: &str, outputs: Vec<OutputSpec>) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            movie_id: None,
            input: InputSpec {
                source_url: "in.mkv".to_string(),
                format: None,
            },
            outputs,
            hls_settings: HlsSettings::default(),
            audio_config: None,
        }
    }

    #[tokio::test]
    async fn test_run_rendition_success_emits_progress() {
        let (tx, mut rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let cmd = shell_command(
            "echo 'time=00:00:30.00 fps= 25' 1>&2; echo 'time=00:01:00.00 fps= 25' 1>&2",
        );
        run_rendition(cmd, "720p_1500k", 120.0, &cancel, tx)
            .await
            .expect("Shell stub should succeed");

        let first = rx.recv().await.expect("First sample");
        assert!((first.percent - 25.0).abs() < 0.001);
        let second = rx.recv().await.expect("Second sample");
        assert!((second.percent - 50.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_run_rendition_nonzero_exit_carries_stderr_tail() {
        let (tx, _rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let cmd = shell_command("echo 'boom: encoder not found' 1>&2; exit 1");
        let err = run_rendition(cmd, "1080p_5000k", 120.0, &cancel, tx)
            .await
            .expect_err("Non-zero exit should fail");

        match err {
            TranscodeError::TranscodeFailed { rendition, detail } => {
                assert_eq!(rendition, "1080p_5000k");
                assert!(detail.contains("boom: encoder not found"));
            }
            other => panic!("Expected TranscodeFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_rendition_cancellation_terminates_process() {
        let (tx, _rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let cmd = shell_command("sleep 30");
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });

        let start = std::time::Instant::now();
        let err = run_rendition(cmd, "720p_1500k", 120.0, &cancel, tx)
            .await
            .expect_err("Cancelled run should fail");

        assert!(matches!(err, TranscodeError::Cancelled));
        // Far less than the sleep: the process was actually terminated
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_rendition_full_sink_drops_samples() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        // More samples than capacity; overflow must be dropped, not block
        let script = (1..=5)
            .map(|i| format!("echo 'time=00:00:0{}.00 fps= 10' 1>&2", i))
            .collect::<Vec<_>>()
            .join("; ");
        run_rendition(shell_command(&script), "720p_1500k", 100.0, &cancel, tx)
            .await
            .expect("Should succeed despite full sink");

        // Exactly the first sample made it in; the channel never blocked
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_execute_cancelled_before_start_cleans_staging() {
        let temp_root = TempDir::new().unwrap();
        let driver = TranscoderDriver::new(temp_root.path().to_path_buf());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let job = test_job("cancelled-job", Vec::new());
        let (tx, _rx) = mpsc::channel(10);

        let err = driver
            .execute(&job, Path::new("/nonexistent/in.mkv"), &[], &cancel, &tx)
            .await
            .expect_err("Pre-cancelled job should fail");

        assert!(matches!(err, TranscodeError::Cancelled));
        assert!(!temp_root.path().join("cancelled-job").exists());
    }

    #[tokio::test]
    async fn test_probe_duration_missing_input_is_unusable() {
        // Works whether or not ffprobe is installed: either the spawn
        // fails or ffprobe exits non-zero for a missing file.
        let err = probe_duration(Path::new("/nonexistent/absent.mkv"))
            .await
            .expect_err("Missing input must not probe");
        assert!(matches!(err, TranscodeError::InputUnusable(_)));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(TranscodeStage::Staging.to_string(), "staging");
        assert_eq!(TranscodeStage::Probing.to_string(), "probing");
        assert_eq!(TranscodeStage::Transcoding(1).to_string(), "transcoding[1]");
        assert_eq!(TranscodeStage::Committing(0).to_string(), "committing[0]");
        assert_eq!(TranscodeStage::Done.to_string(), "done");
    }

    #[test]
    fn test_cancelled_error_message_mentions_cancellation() {
        let err = TranscodeError::Cancelled;
        assert!(err.to_string().contains("cancelled"));
    }
}
