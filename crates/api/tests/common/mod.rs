#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use replay_api::config::ServerConfig;
use replay_api::router::build_app_router;
use replay_api::state::AppState;
use replay_core::archive::ZipFrameExtractor;
use replay_core::assembly::{EncodeJob, EncodeMode, VideoEncoder};
use replay_core::config::PipelineConfig;
use replay_core::ffmpeg::{FfmpegError, UnavailableEncoder};
use replay_pipeline::{OfflineGeoResolver, PipelineOrchestrator};

pub const BOUNDARY: &str = "replay-test-boundary";

/// Encoder stand-in that writes a fixed number of bytes, or fails.
pub struct StubEncoder {
    pub output_bytes: usize,
    pub fail: bool,
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn encode(&self, job: &EncodeJob, _mode: EncodeMode) -> Result<(), FfmpegError> {
        if self.fail {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: Some(1),
                stderr: "Conversion failed!".into(),
            });
        }
        tokio::fs::write(&job.output, vec![0u8; self.output_bytes]).await?;
        Ok(())
    }
}

/// Encoder stand-in that takes longer than any test request timeout.
pub struct SlowEncoder {
    pub delay: std::time::Duration,
}

#[async_trait]
impl VideoEncoder for SlowEncoder {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn encode(&self, job: &EncodeJob, _mode: EncodeMode) -> Result<(), FfmpegError> {
        tokio::time::sleep(self.delay).await;
        tokio::fs::write(&job.output, b"late").await?;
        Ok(())
    }
}

pub fn working_encoder() -> Arc<dyn VideoEncoder> {
    Arc::new(StubEncoder {
        output_bytes: 1024,
        fail: false,
    })
}

pub fn failing_encoder() -> Arc<dyn VideoEncoder> {
    Arc::new(StubEncoder {
        output_bytes: 0,
        fail: true,
    })
}

pub fn missing_encoder() -> Arc<dyn VideoEncoder> {
    Arc::new(UnavailableEncoder)
}

/// Build a test `ServerConfig` rooted at `storage_root`.
pub fn test_config(storage_root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        pipeline: PipelineConfig::with_storage_root(storage_root),
    }
}

/// Build the full application router with the given encoder, native zip
/// extraction, and geolocation switched off.
pub fn build_test_app(storage_root: &Path, encoder: Arc<dyn VideoEncoder>) -> Router {
    build_test_app_with_config(test_config(storage_root), encoder)
}

/// Same as [`build_test_app`] with a caller-supplied config.
pub fn build_test_app_with_config(config: ServerConfig, encoder: Arc<dyn VideoEncoder>) -> Router {
    let pipeline = PipelineOrchestrator::new(
        config.pipeline.clone(),
        Arc::new(ZipFrameExtractor),
        encoder,
        Arc::new(OfflineGeoResolver),
    );
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline: Arc::new(pipeline),
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// One part of a multipart body.
pub enum Part<'a> {
    File {
        name: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

/// Encode `parts` as `multipart/form-data` with [`BOUNDARY`].
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                name,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/zip\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart body to the upload endpoint.
pub async fn post_upload(
    app: Router,
    parts: &[Part<'_>],
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/sessions/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(multipart_body(parts))).unwrap();
    app.oneshot(request).await.unwrap()
}

/// A zip archive holding `frames` small JPEG entries plus one non-image.
pub fn frame_archive(frames: usize) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for i in 0..frames {
        writer
            .start_file(format!("screenshot_{i:04}.jpg"), options)
            .unwrap();
        writer.write_all(&[0xFF, 0xD8, 0xFF, 0xE0, i as u8]).unwrap();
    }
    writer.start_file("manifest.txt", options).unwrap();
    writer.write_all(b"not a frame").unwrap();
    writer.finish().unwrap().into_inner()
}
