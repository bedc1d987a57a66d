//! Progress extraction from ffmpeg's stderr stream.
//!
//! ffmpeg reports status lines like
//! `frame= 1234 fps= 48 ... time=00:01:15.36 bitrate= ...` while encoding.
//! Each matched time is converted to a percentage of the probed input
//! duration; fps on the same line feeds an ETA estimate.

use crate::models::ProgressSample;
use regex::Regex;

/// Stateless-per-line parser bound to one input's total duration
pub struct ProgressParser {
    re_time: Regex,
    re_fps: Regex,
    total_duration: f64,
}

impl ProgressParser {
    /// Create a parser for an input of `total_duration` seconds.
    ///
    /// A zero duration is valid: percent stays at 0 and the transcode
    /// proceeds without meaningful progress.
    pub fn new(total_duration: f64) -> Self {
        Self {
            re_time: Regex::new(r"time=(\d{2}):(\d{2}):(\d{2}\.\d+)").expect("valid time regex"),
            re_fps: Regex::new(r"fps=\s*(\d+(?:\.\d+)?)").expect("valid fps regex"),
            total_duration,
        }
    }

    /// Parse one stderr line into a progress sample.
    ///
    /// Returns None for lines without a `time=` field (most of ffmpeg's
    /// output).
    pub fn parse_line(&self, line: &str) -> Option<ProgressSample> {
        let caps = self.re_time.captures(line)?;

        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        let current_secs = hours * 3600.0 + minutes * 60.0 + seconds;

        let percent = if self.total_duration > 0.0 {
            (current_secs / self.total_duration * 100.0).min(100.0)
        } else {
            0.0
        };

        let fps = self
            .re_fps
            .captures(line)
            .and_then(|fps_caps| fps_caps[1].parse::<f64>().ok())
            .unwrap_or(0.0);

        let eta_secs = if fps > 0.0 {
            ((self.total_duration - current_secs) / fps).max(0.0) as u64
        } else {
            0
        };

        Some(ProgressSample {
            percent,
            fps,
            eta_secs,
        })
    }
}
