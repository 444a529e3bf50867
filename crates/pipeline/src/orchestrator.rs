//! Upload pipeline state machine.
//!
//! ```text
//! Received → Extracting → (Extracted | ExtractFailed) → Assembling
//!          → (Assembled | AssembleFailed) → Recorded → CleanedUp
//! ```
//!
//! Every run owns one [`ScratchDir`]; it is removed exactly once when the
//! run ends, whichever terminal state was reached.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use replay_core::archive::{ArchiveExtractor, FrameExtractor};
use replay_core::assembly::{SessionTiming, VideoAssembler, VideoEncoder};
use replay_core::config::PipelineConfig;
use replay_core::device::normalize_user_data;
use replay_core::error::CoreError;
use replay_core::ffmpeg::{detect_encoder, FfmpegError};
use replay_core::scratch::ScratchDir;
use replay_core::session::{
    compression_ratio, effective_fps, format_bytes, frame_count_diverges, session_start_time,
};
use replay_core::storage::{storage_key, video_file_name, SessionStore, StorageError};
use replay_core::types::{SessionRecord, Timestamp, UploadMetadata};
use serde::Serialize;
use tracing::Instrument;

use crate::geo::{GeoLookup, GeoResolver, OfflineGeoResolver};

// ---------------------------------------------------------------------------
// States and errors
// ---------------------------------------------------------------------------

/// Where a pipeline run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Extracting,
    Extracted,
    ExtractFailed,
    Assembling,
    Assembled,
    AssembleFailed,
    Recorded,
    CleanedUp,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::ExtractFailed => "extract_failed",
            Self::Assembling => "assembling",
            Self::Assembled => "assembled",
            Self::AssembleFailed => "assemble_failed",
            Self::Recorded => "recorded",
            Self::CleanedUp => "cleaned_up",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transition(state: PipelineState) {
    tracing::debug!(state = %state, "Pipeline state");
}

/// Why a run ended without a recorded session.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or malformed input, or an archive with no usable frames.
    #[error("{0}")]
    Input(String),

    #[error("video encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("video conversion failed: {0}")]
    EncodeFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Input(msg),
        }
    }
}

impl From<FfmpegError> for PipelineError {
    fn from(err: FfmpegError) -> Self {
        match err {
            FfmpegError::Unavailable(msg) => Self::EncoderUnavailable(msg),
            other => Self::EncodeFailed(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// One inbound upload as received by the HTTP layer.
#[derive(Debug, Default, Clone)]
pub struct UploadRequest {
    /// Bytes of the `screenshots` archive part.
    pub archive: Option<Vec<u8>>,
    /// Text of the `metadata` part.
    pub metadata: Option<String>,
    /// Client address chosen from the request headers.
    pub client_ip: Option<String>,
}

/// Body returned to the uploader on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub session_id: String,
    pub video_file: String,
    pub session_duration: f64,
    pub frame_count: u64,
    pub actual_image_count: u64,
    pub original_size: String,
    pub video_size: String,
    pub compression_ratio: String,
    #[serde(rename = "effectiveFPS")]
    pub effective_fps: f64,
}

impl From<&SessionRecord> for SessionResponse {
    fn from(record: &SessionRecord) -> Self {
        Self {
            success: true,
            session_id: record.session_id.clone(),
            video_file: record.video_file.clone(),
            session_duration: record.session_duration,
            frame_count: record.frame_count,
            actual_image_count: record.actual_image_count,
            original_size: format_bytes(record.original_zip_size),
            video_size: format_bytes(record.video_size),
            compression_ratio: format!("{:.1}%", record.compression_ratio),
            effective_fps: record.effective_fps,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs uploads through extraction, geolocation, assembly, and recording.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    extractor: Arc<dyn FrameExtractor>,
    assembler: VideoAssembler,
    geo: Arc<dyn GeoLookup>,
    store: SessionStore,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        extractor: Arc<dyn FrameExtractor>,
        encoder: Arc<dyn VideoEncoder>,
        geo: Arc<dyn GeoLookup>,
    ) -> Self {
        Self {
            assembler: VideoAssembler::new(encoder, &config),
            store: SessionStore::new(config.storage_root.clone()),
            config,
            extractor,
            geo,
        }
    }

    /// Wire the production backends: native zip extraction with `unzip`
    /// fallback, the ffmpeg found on this host, and HTTP geolocation unless
    /// disabled.
    pub fn from_config(config: PipelineConfig) -> Result<Self, reqwest::Error> {
        let extractor: Arc<dyn FrameExtractor> = Arc::new(ArchiveExtractor::detect());
        let encoder = detect_encoder(&config.encoder);
        let geo: Arc<dyn GeoLookup> = if config.geo.enabled {
            Arc::new(GeoResolver::new(config.geo.clone())?)
        } else {
            tracing::info!("Geolocation disabled");
            Arc::new(OfflineGeoResolver)
        };
        Ok(Self::new(config, extractor, encoder, geo))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn encoder_available(&self) -> bool {
        self.assembler.encoder_available()
    }

    /// Process one upload end to end.
    pub async fn process(&self, request: UploadRequest) -> Result<SessionResponse, PipelineError> {
        let received_at = Utc::now();
        transition(PipelineState::Received);

        let archive = request
            .archive
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| PipelineError::Input("No screenshots archive uploaded".into()))?;
        let raw_metadata = request
            .metadata
            .ok_or_else(|| PipelineError::Input("No metadata provided".into()))?;
        let metadata = UploadMetadata::parse(&raw_metadata, received_at)?;
        let user_key = storage_key(&metadata.user_id)?;
        let session_key = storage_key(&metadata.session_id)?;

        let span = tracing::info_span!(
            "upload",
            user_id = %metadata.user_id,
            session_id = %metadata.session_id,
        );
        let ctx = RunContext {
            metadata: &metadata,
            user_key: &user_key,
            session_key: &session_key,
            client_ip: request.client_ip.as_deref(),
            received_at,
        };
        self.execute(archive, &ctx).instrument(span).await
    }

    /// Run inside a fresh scratch directory and remove it afterwards.
    async fn execute(
        &self,
        archive: Vec<u8>,
        ctx: &RunContext<'_>,
    ) -> Result<SessionResponse, PipelineError> {
        let scratch_root = &self.config.scratch_root;
        let scratch = ScratchDir::create(scratch_root, ctx.user_key, ctx.metadata.timestamp)
            .await
            .map_err(|source| StorageError::Io {
                path: scratch_root.clone(),
                source,
            })?;

        let result = self.run(&scratch, archive, ctx).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.remove().await {
            tracing::warn!(path = %scratch_path.display(), error = %e, "Failed to remove scratch directory");
        }
        transition(PipelineState::CleanedUp);

        match &result {
            Ok(response) => tracing::info!(
                frames = response.actual_image_count,
                video_size = %response.video_size,
                "Session recorded"
            ),
            Err(e) => tracing::warn!(error = %e, "Upload failed"),
        }
        result
    }

    async fn run(
        &self,
        scratch: &ScratchDir,
        archive: Vec<u8>,
        ctx: &RunContext<'_>,
    ) -> Result<SessionResponse, PipelineError> {
        let metadata = ctx.metadata;

        // Extract
        transition(PipelineState::Extracting);
        let archive_path = scratch.archive_path();
        let original_zip_size = archive.len() as u64;
        write_file(&archive_path, &archive).await?;
        drop(archive);

        // Geolocation does not depend on the archive.
        let frames_dir = scratch.frames_dir();
        let (extracted, geo) = tokio::join!(
            self.extractor.extract(&archive_path, &frames_dir),
            self.geo.resolve(ctx.client_ip),
        );
        let image_count = match extracted {
            Ok(0) => {
                transition(PipelineState::ExtractFailed);
                return Err(PipelineError::Input("No images found in archive".into()));
            }
            Ok(n) => n as u64,
            Err(e) => {
                transition(PipelineState::ExtractFailed);
                return Err(PipelineError::Input(format!(
                    "Failed to extract archive: {e}"
                )));
            }
        };
        transition(PipelineState::Extracted);

        if frame_count_diverges(
            metadata.frame_count,
            image_count,
            self.config.frame_count_tolerance_frames,
        ) {
            tracing::warn!(
                claimed = metadata.frame_count,
                extracted = image_count,
                "Frame count differs from client claim"
            );
        }

        let user_data = normalize_user_data(&metadata.user_data);

        // Assemble
        transition(PipelineState::Assembling);
        let timing = SessionTiming {
            session_duration: metadata.session_duration,
            claimed_frames: metadata.frame_count,
            framerate: metadata.framerate,
        };
        let job = self
            .assembler
            .plan(&frames_dir, &scratch.encode_output_path(), &timing);
        let video = match self.assembler.assemble(&job).await {
            Ok(video) => video,
            Err(e) => {
                transition(PipelineState::AssembleFailed);
                tracing::error!(error = %e, "Video assembly failed");
                return Err(e.into());
            }
        };
        transition(PipelineState::Assembled);
        tracing::debug!(
            input_fps = video.input_fps,
            mode = ?video.mode,
            size = video.size,
            "Video encoded"
        );

        // Record
        let date = ctx.received_at.date_naive();
        let dest = self.store.video_path(ctx.user_key, ctx.session_key, date);
        let video_size = self.store.place_video(&video.path, &dest).await?;

        let record = SessionRecord {
            user_id: metadata.user_id.clone(),
            session_id: metadata.session_id.clone(),
            timestamp: metadata.timestamp,
            session_start_time: session_start_time(metadata.timestamp, metadata.session_duration),
            session_duration: metadata.session_duration,
            frame_count: metadata.frame_count,
            actual_image_count: image_count,
            framerate: metadata.framerate,
            user_data,
            geo,
            received_at: ctx.received_at,
            video_file: video_file_name(ctx.session_key),
            original_zip_size,
            video_size,
            compression_ratio: compression_ratio(original_zip_size, video_size),
            platform: metadata.user_data_str("platform"),
            app_version: metadata.user_data_str("appVersion"),
            effective_fps: effective_fps(image_count, metadata.session_duration),
        };

        if let Err(e) = self.persist(&record, ctx, date).await {
            // A failed upload leaves no video or record behind.
            let record_path = self.store.record_path(ctx.user_key, ctx.session_key, date);
            for path in [&dest, &record_path] {
                remove_if_present(path).await;
            }
            return Err(e.into());
        }
        transition(PipelineState::Recorded);

        Ok(SessionResponse::from(&record))
    }

    async fn persist(
        &self,
        record: &SessionRecord,
        ctx: &RunContext<'_>,
        date: NaiveDate,
    ) -> Result<(), StorageError> {
        self.store
            .write_session_record(record, ctx.user_key, ctx.session_key, date)
            .await?;
        self.store.update_summary(ctx.user_key, record).await?;
        Ok(())
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed output of failed upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove output of failed upload")
        }
    }
}

/// Per-run values threaded through [`PipelineOrchestrator::run`].
struct RunContext<'a> {
    metadata: &'a UploadMetadata,
    user_key: &'a str,
    session_key: &'a str,
    client_ip: Option<&'a str>,
    received_at: Timestamp,
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
}
