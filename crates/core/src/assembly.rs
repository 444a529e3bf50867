//! Session video assembly.
//!
//! Derives the playback framerate from the session's real elapsed time,
//! plans the encode, and drives a [`VideoEncoder`] with one retry in
//! compatibility mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::FRAME_PATTERN;
use crate::config::PipelineConfig;
use crate::ffmpeg::FfmpegError;

/// Timing facts reported by the client for one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTiming {
    pub session_duration: f64,
    pub claimed_frames: u64,
    pub framerate: u32,
}

/// Input framerate for the encoder.
///
/// With a known duration and a claimed frame count the rate is
/// `claimed_frames / session_duration`, clamped to `[min, max]`; capture
/// throttling can push the real rate well below the nominal one. Otherwise
/// the nominal capture framerate is used unchanged.
pub fn derive_output_fps(timing: &SessionTiming, min: f64, max: f64) -> f64 {
    if timing.session_duration > 0.0 && timing.claimed_frames > 0 {
        (timing.claimed_frames as f64 / timing.session_duration).clamp(min, max)
    } else {
        f64::from(timing.framerate)
    }
}

/// Rate of the encoded stream: the input rate kept within `[1, max]` so
/// very slow sessions still produce a playable file.
pub fn output_stream_rate(input_fps: f64, max_output_fps: f64) -> f64 {
    input_fps.clamp(1.0, max_output_fps.max(1.0))
}

/// Encoder settings for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// High profile, balanced preset.
    Primary,
    /// Baseline profile, fastest preset; used after a primary failure.
    Compatibility,
}

/// Everything an encoder needs for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    pub frames_dir: PathBuf,
    pub frame_pattern: &'static str,
    pub output: PathBuf,
    pub input_fps: f64,
    pub output_fps: f64,
    /// Exact output duration in seconds, when the session duration is known.
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
}

/// A backend that turns a frame sequence into an MP4.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend can run at all in this environment.
    fn is_available(&self) -> bool {
        true
    }

    async fn encode(&self, job: &EncodeJob, mode: EncodeMode) -> Result<(), FfmpegError>;
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub size: u64,
    pub input_fps: f64,
    pub mode: EncodeMode,
}

/// Plans and runs the encode for one session.
pub struct VideoAssembler {
    encoder: Arc<dyn VideoEncoder>,
    fps_clamp_min: f64,
    fps_clamp_max: f64,
    max_output_fps: f64,
    width: u32,
    height: u32,
}

impl VideoAssembler {
    pub fn new(encoder: Arc<dyn VideoEncoder>, config: &PipelineConfig) -> Self {
        Self {
            encoder,
            fps_clamp_min: config.fps_clamp_min,
            fps_clamp_max: config.fps_clamp_max,
            max_output_fps: config.max_output_fps,
            width: config.encoder.target_width,
            height: config.encoder.target_height,
        }
    }

    pub fn encoder_available(&self) -> bool {
        self.encoder.is_available()
    }

    /// Build the encode job for frames in `frames_dir`.
    pub fn plan(&self, frames_dir: &Path, output: &Path, timing: &SessionTiming) -> EncodeJob {
        let input_fps = derive_output_fps(timing, self.fps_clamp_min, self.fps_clamp_max);
        EncodeJob {
            frames_dir: frames_dir.to_path_buf(),
            frame_pattern: FRAME_PATTERN,
            output: output.to_path_buf(),
            input_fps,
            output_fps: output_stream_rate(input_fps, self.max_output_fps),
            duration: (timing.session_duration > 0.0).then_some(timing.session_duration),
            width: self.width,
            height: self.height,
        }
    }

    /// Run the encoder, retrying once in compatibility mode when the primary
    /// attempt exits non-zero or produces no file.
    pub async fn assemble(&self, job: &EncodeJob) -> Result<AssembledVideo, FfmpegError> {
        if !self.encoder.is_available() {
            return Err(FfmpegError::Unavailable(
                "no video encoder was found at startup".into(),
            ));
        }

        let mode = match self.attempt(job, EncodeMode::Primary).await {
            Ok(()) => EncodeMode::Primary,
            Err(e @ (FfmpegError::ExecutionFailed { .. } | FfmpegError::MissingOutput(_))) => {
                tracing::warn!(
                    encoder = self.encoder.name(),
                    error = %e,
                    "Primary encode failed, retrying in compatibility mode"
                );
                let _ = tokio::fs::remove_file(&job.output).await;
                self.attempt(job, EncodeMode::Compatibility).await?;
                EncodeMode::Compatibility
            }
            Err(e) => return Err(e),
        };

        let size = tokio::fs::metadata(&job.output).await?.len();
        Ok(AssembledVideo {
            path: job.output.clone(),
            size,
            input_fps: job.input_fps,
            mode,
        })
    }

    async fn attempt(&self, job: &EncodeJob, mode: EncodeMode) -> Result<(), FfmpegError> {
        self.encoder.encode(job, mode).await?;
        if tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(FfmpegError::MissingOutput(
                job.output.to_string_lossy().to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    fn timing(duration: f64, frames: u64, framerate: u32) -> SessionTiming {
        SessionTiming {
            session_duration: duration,
            claimed_frames: frames,
            framerate,
        }
    }

    #[test]
    fn fps_from_duration() {
        assert_eq!(derive_output_fps(&timing(20.0, 100, 10), 0.1, 30.0), 5.0);
    }

    #[test]
    fn fps_clamps_high() {
        assert_eq!(derive_output_fps(&timing(0.2, 100, 10), 0.1, 30.0), 30.0);
    }

    #[test]
    fn fps_clamps_low() {
        assert_eq!(derive_output_fps(&timing(1000.0, 1, 10), 0.1, 30.0), 0.1);
    }

    #[test]
    fn fps_falls_back_to_nominal() {
        assert_eq!(derive_output_fps(&timing(0.0, 100, 10), 0.1, 30.0), 10.0);
        assert_eq!(derive_output_fps(&timing(12.0, 0, 7), 0.1, 30.0), 7.0);
    }

    #[test]
    fn stream_rate_bounds() {
        assert_eq!(output_stream_rate(0.1, 30.0), 1.0);
        assert_eq!(output_stream_rate(5.0, 30.0), 5.0);
        assert_eq!(output_stream_rate(60.0, 30.0), 30.0);
    }

    /// Encoder double that records attempts and can fail the primary mode.
    struct ScriptedEncoder {
        fail_modes: Vec<EncodeMode>,
        attempts: Mutex<Vec<EncodeMode>>,
    }

    impl ScriptedEncoder {
        fn new(fail_modes: Vec<EncodeMode>) -> Self {
            Self {
                fail_modes,
                attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VideoEncoder for ScriptedEncoder {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn encode(&self, job: &EncodeJob, mode: EncodeMode) -> Result<(), FfmpegError> {
            self.attempts.lock().unwrap().push(mode);
            if self.fail_modes.contains(&mode) {
                return Err(FfmpegError::ExecutionFailed {
                    exit_code: Some(1),
                    stderr: "boom".into(),
                });
            }
            tokio::fs::write(&job.output, vec![0u8; 64]).await?;
            Ok(())
        }
    }

    fn assembler(encoder: Arc<dyn VideoEncoder>) -> VideoAssembler {
        VideoAssembler::new(encoder, &PipelineConfig::with_storage_root("/unused"))
    }

    #[test]
    fn plan_sets_duration_cap_only_when_known() {
        let a = assembler(Arc::new(ScriptedEncoder::new(vec![])));
        let job = a.plan(Path::new("/f"), Path::new("/o.mp4"), &timing(20.0, 100, 10));
        assert_eq!(job.input_fps, 5.0);
        assert_eq!(job.output_fps, 5.0);
        assert_eq!(job.duration, Some(20.0));
        assert_eq!(job.frame_pattern, "frame_%03d.jpg");
        assert_eq!((job.width, job.height), (720, 1280));

        let job = a.plan(Path::new("/f"), Path::new("/o.mp4"), &timing(0.0, 100, 10));
        assert_eq!(job.input_fps, 10.0);
        assert_eq!(job.duration, None);
    }

    #[tokio::test]
    async fn assemble_primary_success() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(ScriptedEncoder::new(vec![]));
        let a = assembler(encoder.clone());
        let job = a.plan(dir.path(), &dir.path().join("out.mp4"), &timing(2.0, 20, 10));

        let video = a.assemble(&job).await.unwrap();
        assert_eq!(video.size, 64);
        assert_eq!(video.mode, EncodeMode::Primary);
        assert_eq!(*encoder.attempts.lock().unwrap(), vec![EncodeMode::Primary]);
    }

    #[tokio::test]
    async fn assemble_retries_in_compatibility_mode() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(ScriptedEncoder::new(vec![EncodeMode::Primary]));
        let a = assembler(encoder.clone());
        let job = a.plan(dir.path(), &dir.path().join("out.mp4"), &timing(2.0, 20, 10));

        let video = a.assemble(&job).await.unwrap();
        assert_eq!(video.mode, EncodeMode::Compatibility);
        assert_eq!(
            *encoder.attempts.lock().unwrap(),
            vec![EncodeMode::Primary, EncodeMode::Compatibility]
        );
    }

    #[tokio::test]
    async fn assemble_fails_when_both_modes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(ScriptedEncoder::new(vec![
            EncodeMode::Primary,
            EncodeMode::Compatibility,
        ]));
        let a = assembler(encoder);
        let output = dir.path().join("out.mp4");
        let job = a.plan(dir.path(), &output, &timing(2.0, 20, 10));

        let result = a.assemble(&job).await;
        assert_matches!(result, Err(FfmpegError::ExecutionFailed { .. }));
        assert!(!output.exists());
    }

    /// Encoder that "succeeds" without writing anything.
    struct SilentEncoder;

    #[async_trait]
    impl VideoEncoder for SilentEncoder {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn encode(&self, _job: &EncodeJob, _mode: EncodeMode) -> Result<(), FfmpegError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let a = assembler(Arc::new(SilentEncoder));
        let job = a.plan(dir.path(), &dir.path().join("out.mp4"), &timing(1.0, 1, 10));
        assert_matches!(a.assemble(&job).await, Err(FfmpegError::MissingOutput(_)));
    }
}
