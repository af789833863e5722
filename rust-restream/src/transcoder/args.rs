//! Transcoder command line.
//!
//! Arguments depend only on the locator, the channel's output paths and the
//! HLS shape from configuration, so the same inputs always produce the same
//! command.

use std::path::Path;

use crate::config::TranscoderConfig;

/// Build ffmpeg arguments for a rolling HLS window.
pub fn build_args(
    config: &TranscoderConfig,
    locator: &str,
    playlist_path: &Path,
    segment_pattern: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostats", "-loglevel", "warning"]
        .into_iter()
        .map(String::from)
        .collect();

    // Network inputs drop out; let ffmpeg reconnect before giving up.
    if locator.starts_with("http://") || locator.starts_with("https://") {
        args.extend(
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]
            .into_iter()
            .map(String::from),
        );
    }

    args.extend(["-i".to_string(), locator.to_string()]);

    // Video: copy or re-encode; audio: AAC stereo for broad player support.
    args.extend(["-c:v".to_string(), config.video_codec.clone()]);
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        config.audio_bitrate.clone(),
        "-ac".to_string(),
        "2".to_string(),
    ]);

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.segment_duration_secs.to_string(),
        "-hls_list_size".to_string(),
        config.window_size.to_string(),
        "-hls_delete_threshold".to_string(),
        config.grace_segments.max(1).to_string(),
        "-hls_flags".to_string(),
        "delete_segments+temp_file+omit_endlist".to_string(),
        // Restarted runs never reuse a previous run's sequence numbers.
        "-hls_start_number_source".to_string(),
        "epoch".to_string(),
        "-hls_segment_filename".to_string(),
        segment_pattern.to_string_lossy().to_string(),
    ]);

    args.push("-y".to_string());
    args.push(playlist_path.to_string_lossy().to_string());

    args
}
