//! Host probe for the transcode worker agent.
//!
//! Two concerns: a one-shot capability discovery that asks the ffmpeg
//! binary which encoders it was built with, and a cheap load snapshot
//! taken on every sync tick. Capability discovery is cached by the
//! supervisor for process lifetime; snapshots are ephemeral.

use crate::models::{HardwareStats, WorkerCapabilities};
use std::time::Duration;
use sysinfo::System;
use thiserror::Error;
use tokio::process::Command;

/// Encoder tags the agent knows how to classify, scanned in this order.
/// Hardware encoders first, software fallbacks last.
const KNOWN_ENCODERS: &[&str] = &[
    "h264_nvenc",
    "hevc_nvenc",
    "h264_qsv",
    "h264_vaapi",
    "h264_videotoolbox",
    "h264_v4l2m2m",
    "libx264",
    "libx265",
];

/// CPU sampling window: short enough to stay responsive, long enough to
/// smooth bursts.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

/// Error type for probe operations
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The external tool or OS metrics interface failed
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// IO error launching the external tool
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classify a GPU vendor from an encoder tag.
///
/// Substring heuristic only; advisory metadata, never used for routing.
pub fn classify_vendor(tag: &str) -> Option<&'static str> {
    let lower = tag.to_lowercase();
    if lower.contains("nvenc") {
        Some("nvidia")
    } else if lower.contains("qsv") {
        Some("intel")
    } else if lower.contains("vaapi") {
        Some("vaapi")
    } else if lower.contains("videotoolbox") {
        Some("apple")
    } else if lower.contains("v4l2m2m") {
        Some("raspberry-pi")
    } else {
        None
    }
}

/// Scan an encoder listing for known tags, preserving the declared order
pub fn scan_encoder_listing(listing: &str) -> Vec<String> {
    KNOWN_ENCODERS
        .iter()
        .filter(|tag| listing.contains(*tag))
        .map(|tag| tag.to_string())
        .collect()
}

/// Derive the full capability record from discovered encoder tags
pub fn capabilities_from_codecs(supported_codecs: Vec<String>) -> WorkerCapabilities {
    let gpu_type = supported_codecs
        .iter()
        .find_map(|tag| classify_vendor(tag))
        .map(String::from);
    let has_gpu = gpu_type.is_some();

    // 4K is assumed feasible only with a hardware encoder; software-only
    // hosts are advertised at 1080p.
    let max_resolution = Some(if has_gpu { "4k" } else { "1080p" }.to_string());

    WorkerCapabilities {
        supported_codecs,
        has_gpu,
        gpu_type,
        max_resolution,
    }
}

/// Enumerate supported encoders by running `ffmpeg -hide_banner -encoders`.
///
/// Invoked once at startup; failure is fatal for the process.
///
/// # Errors
/// Returns `ProbeError::ProbeFailed` if ffmpeg is not on PATH or exits
/// non-zero.
pub async fn enumerate_capabilities() -> Result<WorkerCapabilities, ProbeError> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .await
        .map_err(|e| {
            ProbeError::ProbeFailed(format!(
                "ffmpeg -encoders failed; is ffmpeg installed and in PATH? Error: {}",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProbeError::ProbeFailed(format!(
            "ffmpeg -encoders exited with status {}",
            output.status
        )));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    Ok(capabilities_from_codecs(scan_encoder_listing(&listing)))
}

/// Take a fresh host load snapshot.
///
/// CPU usage is measured over a ~500 ms window (two refreshes bracketing a
/// sleep, as sysinfo requires a delay between samples). Callers bound the
/// whole operation with their own timeout.
pub async fn snapshot_load() -> Result<HardwareStats, ProbeError> {
    let mut sys = System::new();

    sys.refresh_cpu_usage();
    tokio::time::sleep(CPU_SAMPLE_WINDOW.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let total_memory = sys.total_memory();
    if total_memory == 0 {
        return Err(ProbeError::ProbeFailed(
            "OS reported zero total memory".to_string(),
        ));
    }

    let cpu_percent = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
    let ram_percent =
        (sys.used_memory() as f64 / total_memory as f64 * 100.0).clamp(0.0, 100.0);

    Ok(HardwareStats::new(cpu_percent, ram_percent))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NVENC_LISTING: &str = r#"Encoders:
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D libx265              libx265 H.265 / HEVC
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder
 V....D hevc_nvenc           NVIDIA NVENC hevc encoder
 A....D aac                  AAC (Advanced Audio Coding)
"#;

    const SOFTWARE_LISTING: &str = r#"Encoders:
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 A....D aac                  AAC (Advanced Audio Coding)
"#;

    #[test]
    fn test_scan_preserves_declared_order() {
        let codecs = scan_encoder_listing(NVENC_LISTING);
        assert_eq!(
            codecs,
            vec!["h264_nvenc", "hevc_nvenc", "libx264", "libx265"]
        );
    }

    #[test]
    fn test_scan_software_only() {
        let codecs = scan_encoder_listing(SOFTWARE_LISTING);
        assert_eq!(codecs, vec!["libx264"]);
    }

    #[test]
    fn test_scan_empty_listing() {
        assert!(scan_encoder_listing("").is_empty());
        assert!(scan_encoder_listing("no encoders here").is_empty());
    }

    #[test]
    fn test_classify_vendor() {
        assert_eq!(classify_vendor("h264_nvenc"), Some("nvidia"));
        assert_eq!(classify_vendor("hevc_nvenc"), Some("nvidia"));
        assert_eq!(classify_vendor("h264_qsv"), Some("intel"));
        assert_eq!(classify_vendor("h264_vaapi"), Some("vaapi"));
        assert_eq!(classify_vendor("h264_videotoolbox"), Some("apple"));
        assert_eq!(classify_vendor("h264_v4l2m2m"), Some("raspberry-pi"));
        assert_eq!(classify_vendor("libx264"), None);
        assert_eq!(classify_vendor(""), None);
    }

    #[test]
    fn test_capabilities_with_hardware() {
        let caps = capabilities_from_codecs(scan_encoder_listing(NVENC_LISTING));
        assert!(caps.has_gpu);
        assert_eq!(caps.gpu_type.as_deref(), Some("nvidia"));
        assert_eq!(caps.max_resolution.as_deref(), Some("4k"));
    }

    #[test]
    fn test_capabilities_software_only() {
        let caps = capabilities_from_codecs(scan_encoder_listing(SOFTWARE_LISTING));
        assert!(!caps.has_gpu);
        assert_eq!(caps.gpu_type, None);
        assert_eq!(caps.max_resolution.as_deref(), Some("1080p"));
        assert_eq!(caps.supported_codecs, vec!["libx264"]);
    }

    #[test]
    fn test_capabilities_empty_codec_list() {
        let caps = capabilities_from_codecs(Vec::new());
        assert!(!caps.has_gpu);
        assert!(caps.supported_codecs.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_load_in_range() {
        // Skips silently if the OS metrics interface is unavailable
        if let Ok(stats) = snapshot_load().await {
            assert!((0.0..=100.0).contains(&stats.cpu_percent));
            assert!((0.0..=100.0).contains(&stats.ram_percent));
            assert_eq!(
                stats.is_busy,
                stats.cpu_percent > 80.0 || stats.ram_percent > 90.0
            );
        }
    }
}
