use std::path::Path;

use crate::roles::RecorderKind;

/// Provider whose streams break with ffmpeg's reconnect options.
pub const NO_RECONNECT_PROVIDER: &str = "freeboxtv";

/// Arguments for one recorder run writing `output` for at most
/// `remaining_seconds` (mplayer has no cap and is stopped by the caller).
pub fn recorder_args(
    kind: RecorderKind,
    provider: &str,
    url: &str,
    remaining_seconds: u64,
    output: &Path,
) -> Vec<String> {
    let output = output.to_string_lossy().into_owned();
    let remaining = remaining_seconds.to_string();
    match kind {
        RecorderKind::Ffmpeg => {
            let mut args: Vec<String> = [
                "-i", url, "-map", "0:v", "-map", "0:a", "-map", "0:s?", "-c:v", "copy", "-c:a",
                "copy", "-c:s", "copy", "-t", remaining.as_str(), "-f", "mpegts",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
            let resilience: &[&str] = if provider == NO_RECONNECT_PROVIDER {
                &["-fflags", "nobuffer", "-err_detect", "ignore_err"]
            } else {
                &[
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_delay_max",
                    "1",
                    "-reconnect_at_eof",
                    "1",
                ]
            };
            args.extend(resilience.iter().map(|arg| arg.to_string()));
            args.extend(["-y".to_string(), output]);
            args
        }
        RecorderKind::Vlc => vec![
            "-v".to_string(),
            format!("--run-time={remaining}"),
            url.to_string(),
            format!("--sout=file/ts:{output}"),
        ],
        RecorderKind::Mplayer => vec![
            url.to_string(),
            "-dumpstream".to_string(),
            "-dumpfile".to_string(),
            output,
        ],
        RecorderKind::Streamlink => {
            let mut args: Vec<String> = [
                "--http-no-ssl-verify",
                "--hls-live-restart",
                "--hls-segment-threads",
                "10",
                "--hls-segment-timeout",
                "10",
                "--stream-segment-attempts",
                "100",
                "--retry-streams",
                "1",
                "--retry-max",
                "100",
                "--stream-segmented-duration",
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
            args.push(clock_duration(remaining_seconds));
            args.extend([
                "-o".to_string(),
                output,
                "-f".to_string(),
                url.to_string(),
                "best".to_string(),
            ]);
            args
        }
    }
}

fn clock_duration(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn out() -> PathBuf {
        PathBuf::from("/v/show-save/show_alpha_1_original.ts")
    }

    #[test]
    fn ffmpeg_remuxes_with_reconnect_flags() {
        let args = recorder_args(RecorderKind::Ffmpeg, "alpha", "http://a/tf1", 1800, &out());
        let joined = args.join(" ");
        assert!(joined.starts_with("-i http://a/tf1 -map 0:v -map 0:a -map 0:s? -c:v copy"));
        assert!(joined.contains("-t 1800 -f mpegts -reconnect 1 -reconnect_streamed 1"));
        assert!(joined.ends_with("-reconnect_at_eof 1 -y /v/show-save/show_alpha_1_original.ts"));
        assert!(!joined.contains("nobuffer"));
    }

    #[test]
    fn freeboxtv_skips_reconnect_flags() {
        let args = recorder_args(RecorderKind::Ffmpeg, "freeboxtv", "rtsp://f/2", 60, &out());
        let joined = args.join(" ");
        assert!(joined.contains("-fflags nobuffer -err_detect ignore_err -y"));
        assert!(!joined.contains("-reconnect"));
    }

    #[test]
    fn vlc_mplayer_and_streamlink_shapes() {
        assert_eq!(
            recorder_args(RecorderKind::Vlc, "alpha", "http://a/tf1", 90, &out()),
            vec![
                "-v",
                "--run-time=90",
                "http://a/tf1",
                "--sout=file/ts:/v/show-save/show_alpha_1_original.ts"
            ]
        );
        assert_eq!(
            recorder_args(RecorderKind::Mplayer, "alpha", "http://a/tf1", 90, &out()),
            vec![
                "http://a/tf1",
                "-dumpstream",
                "-dumpfile",
                "/v/show-save/show_alpha_1_original.ts"
            ]
        );
        let streamlink = recorder_args(RecorderKind::Streamlink, "alpha", "http://a/tf1", 3725, &out())
            .join(" ");
        assert!(streamlink.contains("--retry-streams 1 --retry-max 100"));
        assert!(streamlink.contains("--stream-segment-attempts 100"));
        assert!(streamlink.contains("--stream-segmented-duration 01:02:05"));
        assert!(streamlink.ends_with("-o /v/show-save/show_alpha_1_original.ts -f http://a/tf1 best"));
    }
}
