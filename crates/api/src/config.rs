use replay_core::config::PipelineConfig;

/// Time allowed on top of the encoder budget for extraction and recording.
pub const REQUEST_TIMEOUT_MARGIN_SECS: u64 = 60;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `660`). Uploads wait for up
    /// to two encoder attempts, so this is raised to at least
    /// [`min_request_timeout_secs`].
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 200 MiB).
    pub max_upload_bytes: usize,
    /// Upload pipeline settings.
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `660`                      |
    /// | `MAX_UPLOAD_BYTES`     | `209715200`                |
    ///
    /// Pipeline variables are documented on [`PipelineConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "660".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "209715200".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let pipeline = PipelineConfig::from_env();

        let min_timeout = min_request_timeout_secs(pipeline.encoder.timeout_secs);
        let request_timeout_secs = if request_timeout_secs < min_timeout {
            tracing::warn!(
                request_timeout_secs,
                encoder_timeout_secs = pipeline.encoder.timeout_secs,
                raised_to = min_timeout,
                "Request timeout does not cover two encoder attempts; raising it"
            );
            min_timeout
        } else {
            request_timeout_secs
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_upload_bytes,
            pipeline,
        }
    }
}

/// Smallest request timeout that covers a primary and a compatibility encode
/// plus [`REQUEST_TIMEOUT_MARGIN_SECS`].
pub fn min_request_timeout_secs(encoder_timeout_secs: u64) -> u64 {
    encoder_timeout_secs
        .saturating_mul(2)
        .saturating_add(REQUEST_TIMEOUT_MARGIN_SECS)
}
