//! FFmpeg command construction for HLS renditions.
//!
//! One process per rendition: input, scale filter, video codec/bitrate,
//! resolved audio settings, and the HLS muxer writing segments plus an
//! `index.m3u8` playlist into the rendition's staging directory.

use crate::models::{JobSpec, OutputSpec};
use std::path::Path;
use tokio::process::Command;

/// Segment filename pattern inside a rendition's staging directory
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Per-rendition playlist filename (the master playlist name only shapes
/// the reported manifest URL)
pub const RENDITION_PLAYLIST: &str = "index.m3u8";

/// Vertical pixel count for a resolution tag.
///
/// Unknown tags return None and the scale filter is omitted, preserving
/// the source frame size.
pub fn scale_height(resolution: &str) -> Option<u32> {
    match resolution {
        "2160p" => Some(2160),
        "1080p" => Some(1080),
        "720p" => Some(720),
        "480p" => Some(480),
        "360p" => Some(360),
        _ => None,
    }
}

/// Staging subdirectory name for one rendition, e.g. "1080p_5000k"
pub fn variant_dir_name(output: &OutputSpec) -> String {
    format!("{}_{}", output.resolution, output.bitrate)
}

/// Build the ffmpeg invocation for a single rendition.
///
/// `staging_dir` must already exist; ffmpeg writes all segments and the
/// playlist there. The returned command has no stdio configuration — the
/// driver wires pipes before spawning.
pub fn build_rendition_command(
    job: &JobSpec,
    output: &OutputSpec,
    input_path: &Path,
    staging_dir: &Path,
) -> Command {
    let mut cmd = Command::new("ffmpeg");

    // Input
    cmd.arg("-y");
    cmd.arg("-hide_banner");
    cmd.arg("-i").arg(input_path);

    // Scale filter: -2 keeps aspect ratio with an even width, which some
    // encoders require
    if let Some(height) = scale_height(&output.resolution) {
        cmd.arg("-vf").arg(format!("scale=-2:{}", height));
    }

    // Video
    cmd.arg("-c:v").arg(&output.codec);
    cmd.arg("-b:v").arg(&output.bitrate);

    // Audio: per-rendition override > global config > defaults
    cmd.arg("-c:a").arg(job.audio_codec_for(output));
    cmd.arg("-b:a").arg(job.audio_bitrate_for(output));

    // HLS muxer, VOD-style: every segment stays listed
    cmd.arg("-f").arg("hls");
    cmd.arg("-hls_time").arg(job.segment_time().to_string());
    cmd.arg("-hls_playlist_type").arg("vod");
    cmd.arg("-hls_list_size").arg("0");
    cmd.arg("-hls_segment_filename")
        .arg(staging_dir.join(SEGMENT_PATTERN));
    cmd.arg(staging_dir.join(RENDITION_PLAYLIST));

    cmd
}
