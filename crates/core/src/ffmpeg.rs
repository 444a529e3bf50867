//! FFmpeg encoder backend.
//!
//! Locates an `ffmpeg` binary once at startup and runs it as a bounded
//! subprocess. The process is killed when its timeout elapses.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::assembly::{EncodeJob, EncodeMode, VideoEncoder};
use crate::config::EncoderConfig;

/// Install locations probed after `FFMPEG_PATH` and the `PATH` lookup.
pub const KNOWN_FFMPEG_LOCATIONS: &[&str] = &[
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/opt/homebrew/bin/ffmpeg",
    "/opt/local/bin/ffmpeg",
    "/snap/bin/ffmpeg",
];

/// Longest stderr tail kept in an error.
const STDERR_TAIL_CHARS: usize = 2000;

/// Error type for encoder runs.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("video encoder unavailable: {0}")]
    Unavailable(String),

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder produced no output file: {0}")]
    MissingOutput(String),
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Find an ffmpeg binary: the explicit path first, then `PATH`, then the
/// well-known install locations.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured ffmpeg path does not exist");
    }

    if let Ok(path) = which::which("ffmpeg") {
        return Some(path);
    }

    KNOWN_FFMPEG_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Pick the encoder backend for this process.
pub fn detect_encoder(config: &EncoderConfig) -> Arc<dyn VideoEncoder> {
    match locate_ffmpeg(config.ffmpeg_path.as_deref()) {
        Some(binary) => {
            tracing::info!(binary = %binary.display(), "Using ffmpeg encoder");
            Arc::new(FfmpegEncoder::new(binary, config))
        }
        None => {
            tracing::warn!("ffmpeg not found; video assembly is disabled");
            Arc::new(UnavailableEncoder)
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// x264 encoder driven through the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    timeout: Duration,
    crf: u8,
}

impl FfmpegEncoder {
    pub fn new(binary: PathBuf, config: &EncoderConfig) -> Self {
        Self {
            binary,
            timeout: config.timeout(),
            crf: config.crf,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command-line arguments for one encode attempt.
    ///
    /// Frames are scaled to fit the target box and padded to it exactly. With
    /// a known duration the last frame is held and the output cut so the
    /// video lasts exactly that long.
    pub fn build_args(&self, job: &EncodeJob, mode: EncodeMode) -> Vec<String> {
        let (w, h) = (job.width, job.height);
        let mut filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2"
        );
        if let Some(duration) = job.duration {
            filter.push_str(&format!(",tpad=stop_mode=clone:stop_duration={duration}"));
        }

        let (profile, preset) = match mode {
            EncodeMode::Primary => ("high", "medium"),
            EncodeMode::Compatibility => ("baseline", "ultrafast"),
        };

        let input = job.frames_dir.join(job.frame_pattern);
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-framerate".into(),
            job.input_fps.to_string(),
            "-start_number".into(),
            "0".into(),
            "-i".into(),
            input.to_string_lossy().to_string(),
            "-vf".into(),
            filter,
            "-c:v".into(),
            "libx264".into(),
            "-profile:v".into(),
            profile.into(),
            "-preset".into(),
            preset.into(),
            "-crf".into(),
            self.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
            "-r".into(),
            job.output_fps.to_string(),
        ];
        if let Some(duration) = job.duration {
            args.push("-t".into());
            args.push(duration.to_string());
        }
        args.push(job.output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn encode(&self, job: &EncodeJob, mode: EncodeMode) -> Result<(), FfmpegError> {
        let args = self.build_args(job, mode);
        tracing::debug!(
            binary = %self.binary.display(),
            ?mode,
            input_fps = job.input_fps,
            output_fps = job.output_fps,
            "Running ffmpeg"
        );

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| FfmpegError::Timeout(self.timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => FfmpegError::Unavailable(e.to_string()),
                _ => FfmpegError::Io(e),
            })?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - STDERR_TAIL_CHARS).collect()
}

/// Stand-in used when no encoder binary exists; every encode fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEncoder;

#[async_trait]
impl VideoEncoder for UnavailableEncoder {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn encode(&self, _job: &EncodeJob, _mode: EncodeMode) -> Result<(), FfmpegError> {
        Err(FfmpegError::Unavailable("ffmpeg was not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn job(dir: &Path, duration: Option<f64>) -> EncodeJob {
        EncodeJob {
            frames_dir: dir.join("frames"),
            frame_pattern: "frame_%03d.jpg",
            output: dir.join("out.mp4"),
            input_fps: 5.0,
            output_fps: 5.0,
            duration,
            width: 720,
            height: 1280,
        }
    }

    fn encoder(binary: PathBuf, timeout_secs: u64) -> FfmpegEncoder {
        let config = EncoderConfig {
            timeout_secs,
            ..EncoderConfig::default()
        };
        FfmpegEncoder::new(binary, &config)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let pos = args.iter().position(|a| a == flag).unwrap();
        &args[pos + 1]
    }

    #[test]
    fn primary_args() {
        let enc = encoder(PathBuf::from("ffmpeg"), 300);
        let args = enc.build_args(&job(Path::new("/s"), Some(20.0)), EncodeMode::Primary);

        assert_eq!(args[0], "-y");
        assert_eq!(value_after(&args, "-framerate"), "5");
        assert_eq!(value_after(&args, "-i"), "/s/frames/frame_%03d.jpg");
        assert_eq!(value_after(&args, "-c:v"), "libx264");
        assert_eq!(value_after(&args, "-profile:v"), "high");
        assert_eq!(value_after(&args, "-preset"), "medium");
        assert_eq!(value_after(&args, "-crf"), "28");
        assert_eq!(value_after(&args, "-pix_fmt"), "yuv420p");
        assert_eq!(value_after(&args, "-movflags"), "+faststart");
        assert_eq!(value_after(&args, "-r"), "5");
        assert_eq!(value_after(&args, "-t"), "20");
        assert_eq!(args.last().unwrap(), "/s/out.mp4");

        let vf = value_after(&args, "-vf");
        assert!(vf.starts_with("scale=720:1280:force_original_aspect_ratio=decrease"));
        assert!(vf.contains("pad=720:1280:(ow-iw)/2:(oh-ih)/2"));
        assert!(vf.ends_with("tpad=stop_mode=clone:stop_duration=20"));
    }

    #[test]
    fn compatibility_args_without_duration() {
        let enc = encoder(PathBuf::from("ffmpeg"), 300);
        let args = enc.build_args(&job(Path::new("/s"), None), EncodeMode::Compatibility);

        assert_eq!(value_after(&args, "-profile:v"), "baseline");
        assert_eq!(value_after(&args, "-preset"), "ultrafast");
        assert!(!args.iter().any(|a| a == "-t"));
        assert!(!value_after(&args, "-vf").contains("tpad"));
    }

    #[test]
    fn explicit_path_wins_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(locate_ffmpeg(Some(&fake)), Some(fake));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_CHARS) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("END"));
    }

    #[tokio::test]
    async fn unavailable_encoder_always_fails() {
        let enc = UnavailableEncoder;
        assert!(!enc.is_available());
        let result = enc
            .encode(&job(Path::new("/s"), None), EncodeMode::Primary)
            .await;
        assert_matches!(result, Err(FfmpegError::Unavailable(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let enc = encoder(PathBuf::from("/nonexistent/ffmpeg"), 5);
        let result = enc
            .encode(&job(Path::new("/s"), None), EncodeMode::Primary)
            .await;
        assert_matches!(result, Err(FfmpegError::Unavailable(_)));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encoder(script(dir.path(), "echo 'bad input' >&2; exit 3"), 5);
        let result = enc
            .encode(&job(dir.path(), None), EncodeMode::Primary)
            .await;
        assert_matches!(
            result,
            Err(FfmpegError::ExecutionFailed { exit_code: Some(3), ref stderr }) if stderr == "bad input"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_encoder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encoder(script(dir.path(), "sleep 5"), 0);
        let result = enc
            .encode(&job(dir.path(), None), EncodeMode::Primary)
            .await;
        assert_matches!(result, Err(FfmpegError::Timeout(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn writes_to_last_argument() {
        let dir = tempfile::tempdir().unwrap();
        let enc = encoder(
            script(dir.path(), "for last; do :; done; printf 'mp4' > \"$last\""),
            5,
        );
        let job = job(dir.path(), Some(2.0));
        enc.encode(&job, EncodeMode::Primary).await.unwrap();
        assert_eq!(std::fs::read(&job.output).unwrap(), b"mp4");
    }
}
