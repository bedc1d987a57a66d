//! Wire message types exchanged with the orchestrator.
//!
//! All payloads are JSON with lower_snake_case fields; status strings are
//! uppercase. Optional fields are omitted when absent so the shapes stay
//! byte-compatible with what the orchestrator emits and accepts.

use serde::{Deserialize, Serialize};

/// Worker lifecycle status reported on every sync tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    /// Ready to accept work
    Idle,
    /// Running a job, or the host itself is overloaded
    Busy,
    /// Voluntary shutdown in progress
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "IDLE"),
            WorkerStatus::Busy => write!(f, "BUSY"),
            WorkerStatus::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Capabilities discovered once at startup, immutable thereafter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerCapabilities {
    /// Encoder tags in discovery order, e.g. ["h264_nvenc", "libx264"]
    pub supported_codecs: Vec<String>,
    /// Whether any hardware encoder was found
    pub has_gpu: bool,
    /// Coarse vendor classification, e.g. "nvidia"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    /// Advisory ceiling, e.g. "4k" or "1080p"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<String>,
}

/// Sent once on startup and again on state-loss recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub worker_id: String,
    pub capabilities: WorkerCapabilities,
}

/// Live host telemetry attached to every sync
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HardwareStats {
    /// 0.0 to 100.0
    pub cpu_percent: f64,
    /// 0.0 to 100.0
    pub ram_percent: f64,
    /// Derived: cpu > 80% or ram > 90%
    pub is_busy: bool,
}

impl HardwareStats {
    /// Build a snapshot, deriving the busy flag from the thresholds
    pub fn new(cpu_percent: f64, ram_percent: f64) -> Self {
        Self {
            cpu_percent,
            ram_percent,
            is_busy: cpu_percent > 80.0 || ram_percent > 90.0,
        }
    }
}

/// Periodic bidirectional state exchange with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub hardware_stats: HardwareStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<String>,
}

/// Orchestrator's response to a sync request
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub ack: bool,
    /// Present only when the orchestrator has work for an idle worker
    #[serde(default)]
    pub assigned_job: Option<JobSpec>,
}

/// A transcoding job as dispatched by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<String>,
    pub input: InputSpec,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub hls_settings: HlsSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_config: Option<AudioConfig>,
}

/// Input source description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSpec {
    /// Path to the raw file, possibly relative to the NAS mount
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A single output rendition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSpec {
    /// e.g. "1080p", "720p"
    pub resolution: String,
    /// e.g. "5000k", "2500k"
    pub bitrate: String,
    /// Encoder tag, e.g. "h264_nvenc", "libx264"
    pub codec: String,
    /// Destination directory, possibly relative to the NAS mount
    pub dest_path: String,
    /// Per-rendition audio codec override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Per-rendition audio bitrate override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
}

/// HLS muxer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_playlist_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_time: Option<u32>,
}

/// Global audio encoding settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
}

impl JobSpec {
    /// HLS segment duration in seconds (default 6)
    pub fn segment_time(&self) -> u32 {
        match self.hls_settings.segment_time {
            Some(secs) if secs > 0 => secs,
            _ => 6,
        }
    }

    /// Master playlist filename (default "index.m3u8")
    pub fn master_playlist_name(&self) -> &str {
        self.hls_settings
            .master_playlist_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or("index.m3u8")
    }

    /// Audio codec for one rendition: per-rendition override > global > "aac"
    pub fn audio_codec_for<'a>(&'a self, output: &'a OutputSpec) -> &'a str {
        output
            .audio_codec
            .as_deref()
            .filter(|codec| !codec.is_empty())
            .or_else(|| {
                self.audio_config
                    .as_ref()
                    .and_then(|audio| audio.codec.as_deref())
                    .filter(|codec| !codec.is_empty())
            })
            .unwrap_or("aac")
    }

    /// Audio bitrate for one rendition: per-rendition override > global > "128k"
    pub fn audio_bitrate_for<'a>(&'a self, output: &'a OutputSpec) -> &'a str {
        output
            .audio_bitrate
            .as_deref()
            .filter(|bitrate| !bitrate.is_empty())
            .or_else(|| {
                self.audio_config
                    .as_ref()
                    .and_then(|audio| audio.bitrate.as_deref())
                    .filter(|bitrate| !bitrate.is_empty())
            })
            .unwrap_or("128k")
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// Progress update sent while transcoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusPayload {
    pub worker_id: String,
    /// Always "PROCESSING" while the driver runs
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_sec: Option<u64>,
}

/// Terminal report for a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultPayload {
    pub status: JobOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub metrics: JobMetrics,
}

/// Execution metrics attached to the terminal report
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub total_time_ms: u64,
}

/// One progress gauge sample extracted from the transcoder's stderr
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// 0.0 to 100.0
    pub percent: f64,
    /// Frames per second, 0.0 when unknown
    pub fps: f64,
    /// Estimated seconds remaining, 0 when unknown
    pub eta_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_job() -> JobSpec {
        JobSpec {
            job_id: "job-001".to_string(),
            movie_id: None,
            input: InputSpec {
                source_url: "movies/raw.mkv".to_string(),
                format: None,
            },
            outputs: vec![OutputSpec {
                resolution: "720p".to_string(),
                bitrate: "1500k".to_string(),
                codec: "libx264".to_string(),
                dest_path: "movies/out/720p".to_string(),
                audio_codec: None,
                audio_bitrate: None,
            }],
            hls_settings: HlsSettings::default(),
            audio_config: None,
        }
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&WorkerStatus::Idle).unwrap(), "\"IDLE\"");
        assert_eq!(serde_json::to_string(&WorkerStatus::Busy).unwrap(), "\"BUSY\"");
        assert_eq!(
            serde_json::to_string(&WorkerStatus::Offline).unwrap(),
            "\"OFFLINE\""
        );
    }

    #[test]
    fn test_hardware_stats_busy_derivation() {
        assert!(!HardwareStats::new(50.0, 50.0).is_busy);
        assert!(HardwareStats::new(80.1, 50.0).is_busy);
        assert!(HardwareStats::new(50.0, 90.1).is_busy);
        // Thresholds are strict
        assert!(!HardwareStats::new(80.0, 90.0).is_busy);
    }

    #[test]
    fn test_job_spec_defaults() {
        let job = minimal_job();
        assert_eq!(job.segment_time(), 6);
        assert_eq!(job.master_playlist_name(), "index.m3u8");
        assert_eq!(job.audio_codec_for(&job.outputs[0]), "aac");
        assert_eq!(job.audio_bitrate_for(&job.outputs[0]), "128k");
    }

    #[test]
    fn test_audio_precedence_rendition_over_global() {
        let mut job = minimal_job();
        job.audio_config = Some(AudioConfig {
            codec: Some("libopus".to_string()),
            bitrate: Some("96k".to_string()),
        });
        job.outputs[0].audio_codec = Some("ac3".to_string());

        assert_eq!(job.audio_codec_for(&job.outputs[0]), "ac3");
        // Bitrate has no per-rendition override, so the global wins
        assert_eq!(job.audio_bitrate_for(&job.outputs[0]), "96k");
    }

    #[test]
    fn test_zero_segment_time_falls_back_to_default() {
        let mut job = minimal_job();
        job.hls_settings.segment_time = Some(0);
        assert_eq!(job.segment_time(), 6);
    }

    #[test]
    fn test_job_spec_deserializes_orchestrator_shape() {
        let json = r#"{
            "job_id": "j-42",
            "input": {"source_url": "movies/film.mkv"},
            "outputs": [
                {"resolution": "1080p", "bitrate": "5000k", "codec": "h264_nvenc", "dest_path": "hls/film/1080p"}
            ],
            "hls_settings": {"segment_time": 4},
            "audio_config": {"codec": "aac"}
        }"#;

        let job: JobSpec = serde_json::from_str(json).unwrap();
        assert_eq!(job.job_id, "j-42");
        assert_eq!(job.segment_time(), 4);
        assert_eq!(job.outputs.len(), 1);
        assert_eq!(job.outputs[0].codec, "h264_nvenc");
        assert_eq!(job.audio_bitrate_for(&job.outputs[0]), "128k");
    }

    #[test]
    fn test_sync_response_without_assignment() {
        let resp: SyncResponse = serde_json::from_str(r#"{"ack": true}"#).unwrap();
        assert!(resp.ack);
        assert!(resp.assigned_job.is_none());
    }

    #[test]
    fn test_sync_payload_omits_empty_job_id() {
        let payload = SyncPayload {
            worker_id: "w1".to_string(),
            status: WorkerStatus::Idle,
            hardware_stats: HardwareStats::new(10.0, 20.0),
            current_job_id: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("current_job_id"));
    }

    #[test]
    fn test_result_payload_shape() {
        let payload = JobResultPayload {
            status: JobOutcome::Completed,
            manifest_url: Some("/hls/film/1080p/index.m3u8".to_string()),
            error_msg: None,
            metrics: JobMetrics { total_time_ms: 1234 },
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"status\":\"COMPLETED\""));
        assert!(json.contains("\"total_time_ms\":1234"));
        assert!(!json.contains("error_msg"));
    }
}
