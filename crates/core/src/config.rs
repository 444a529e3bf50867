//! Pipeline configuration.
//!
//! Every tunable that the upload pipeline consults (timeouts, clamp bounds,
//! tolerances, encoder settings, storage roots) lives here and is passed into
//! the pipeline constructor. Values come from environment variables with
//! defaults suitable for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Ordered "what is my IP" services used when the client address is local.
pub const DEFAULT_PUBLIC_IP_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
    "https://ipecho.net/plain",
];

/// Settings for the external video encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Explicit ffmpeg path, probed before the `PATH` lookup.
    pub ffmpeg_path: Option<PathBuf>,
    /// Hard wall-clock limit for one encoder invocation.
    pub timeout_secs: u64,
    /// Output frame width; frames are scaled and padded to fit.
    pub target_width: u32,
    /// Output frame height.
    pub target_height: u32,
    /// x264 constant rate factor.
    pub crf: u8,
}

impl EncoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            timeout_secs: 300,
            target_width: 720,
            target_height: 1280,
            crf: 28,
        }
    }
}

/// Settings for client IP geolocation.
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// When `false` every upload gets the degraded placeholder record.
    pub enabled: bool,
    /// Base URL of the ip-api compatible lookup service.
    pub api_base_url: String,
    pub timeout_secs: u64,
    /// Timeout for each public IP discovery attempt.
    pub public_ip_timeout_secs: u64,
    pub public_ip_services: Vec<String>,
    /// Substituted when the client is local and discovery fails.
    pub dev_fallback_ip: String,
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn public_ip_timeout(&self) -> Duration {
        Duration::from_secs(self.public_ip_timeout_secs)
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base_url: "http://ip-api.com".to_string(),
            timeout_secs: 5,
            public_ip_timeout_secs: 3,
            public_ip_services: DEFAULT_PUBLIC_IP_SERVICES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            dev_fallback_ip: "8.8.8.8".to_string(),
        }
    }
}

/// Top-level configuration for the session-video pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which `videos/` and `users/` are written.
    pub storage_root: PathBuf,
    /// Parent of the per-upload scratch directories.
    pub scratch_root: PathBuf,
    /// Lower bound for a duration-derived framerate.
    pub fps_clamp_min: f64,
    /// Upper bound for a duration-derived framerate.
    pub fps_clamp_max: f64,
    /// Cap on the encoded stream rate.
    pub max_output_fps: f64,
    /// Claimed vs. extracted frame difference above which a warning is logged.
    pub frame_count_tolerance_frames: u64,
    pub encoder: EncoderConfig,
    pub geo: GeoConfig,
}

impl PipelineConfig {
    /// Default configuration rooted at `storage_root`, with scratch space in
    /// `storage_root/tmp`.
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        let storage_root = storage_root.into();
        Self {
            scratch_root: storage_root.join("tmp"),
            storage_root,
            fps_clamp_min: 0.1,
            fps_clamp_max: 30.0,
            max_output_fps: 30.0,
            frame_count_tolerance_frames: 2,
            encoder: EncoderConfig::default(),
            geo: GeoConfig::default(),
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `STORAGE_ROOT`           | `storage`               |
    /// | `SCRATCH_ROOT`           | `$STORAGE_ROOT/tmp`     |
    /// | `FPS_CLAMP_MIN`          | `0.1`                   |
    /// | `FPS_CLAMP_MAX`          | `30`                    |
    /// | `MAX_OUTPUT_FPS`         | `30`                    |
    /// | `FRAME_COUNT_TOLERANCE`  | `2`                     |
    /// | `FFMPEG_PATH`            | unset                   |
    /// | `ENCODER_TIMEOUT_SECS`   | `300`                   |
    /// | `TARGET_WIDTH`           | `720`                   |
    /// | `TARGET_HEIGHT`          | `1280`                  |
    /// | `VIDEO_CRF`              | `28`                    |
    /// | `GEO_LOOKUP_ENABLED`     | `true`                  |
    /// | `GEO_API_BASE_URL`       | `http://ip-api.com`     |
    /// | `GEO_TIMEOUT_SECS`       | `5`                     |
    /// | `PUBLIC_IP_TIMEOUT_SECS` | `3`                     |
    /// | `PUBLIC_IP_SERVICES`     | ipify, ifconfig.me, ... |
    /// | `DEV_FALLBACK_IP`        | `8.8.8.8`               |
    ///
    /// Panics on values that do not parse, so misconfiguration fails at
    /// startup rather than on the first upload.
    pub fn from_env() -> Self {
        let storage_root: PathBuf = std::env::var("STORAGE_ROOT")
            .unwrap_or_else(|_| "storage".into())
            .into();
        let mut config = Self::with_storage_root(storage_root);

        if let Ok(scratch) = std::env::var("SCRATCH_ROOT") {
            config.scratch_root = scratch.into();
        }
        config.fps_clamp_min = env_or("FPS_CLAMP_MIN", config.fps_clamp_min);
        config.fps_clamp_max = env_or("FPS_CLAMP_MAX", config.fps_clamp_max);
        config.max_output_fps = env_or("MAX_OUTPUT_FPS", config.max_output_fps);
        config.frame_count_tolerance_frames =
            env_or("FRAME_COUNT_TOLERANCE", config.frame_count_tolerance_frames);

        assert!(
            config.fps_clamp_min > 0.0 && config.fps_clamp_min <= config.fps_clamp_max,
            "FPS_CLAMP_MIN must be > 0 and <= FPS_CLAMP_MAX"
        );

        let encoder = &mut config.encoder;
        encoder.ffmpeg_path = std::env::var("FFMPEG_PATH").ok().map(PathBuf::from);
        encoder.timeout_secs = env_or("ENCODER_TIMEOUT_SECS", encoder.timeout_secs);
        encoder.target_width = env_or("TARGET_WIDTH", encoder.target_width);
        encoder.target_height = env_or("TARGET_HEIGHT", encoder.target_height);
        encoder.crf = env_or("VIDEO_CRF", encoder.crf);

        // libx264 with yuv420p rejects odd dimensions.
        assert!(
            encoder.target_width > 0
                && encoder.target_height > 0
                && encoder.target_width % 2 == 0
                && encoder.target_height % 2 == 0,
            "TARGET_WIDTH and TARGET_HEIGHT must be positive even numbers"
        );

        let geo = &mut config.geo;
        geo.enabled = env_or("GEO_LOOKUP_ENABLED", geo.enabled);
        if let Ok(url) = std::env::var("GEO_API_BASE_URL") {
            geo.api_base_url = url.trim_end_matches('/').to_string();
        }
        geo.timeout_secs = env_or("GEO_TIMEOUT_SECS", geo.timeout_secs);
        geo.public_ip_timeout_secs = env_or("PUBLIC_IP_TIMEOUT_SECS", geo.public_ip_timeout_secs);
        if let Ok(services) = std::env::var("PUBLIC_IP_SERVICES") {
            geo.public_ip_services = services
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(ip) = std::env::var("DEV_FALLBACK_IP") {
            geo.dev_fallback_ip = ip;
        }

        config
    }
}

/// Read and parse `key`, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
