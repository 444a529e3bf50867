use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use replay_pipeline::{SessionResponse, UploadRequest};

use crate::error::{AppError, AppResult};
use crate::middleware::client_ip::ClientIp;
use crate::state::AppState;

/// Multipart part carrying the zipped frame sequence.
pub const ARCHIVE_FIELD: &str = "screenshots";
/// Multipart part carrying the metadata JSON.
pub const METADATA_FIELD: &str = "metadata";

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(err.body_text())
    }
}

/// POST /api/v1/sessions/upload
///
/// Accept a frame archive plus session metadata, assemble the session video,
/// and record it. Unknown multipart parts are ignored.
pub async fn upload(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    mut multipart: Multipart,
) -> AppResult<Json<SessionResponse>> {
    let mut request = UploadRequest {
        client_ip,
        ..UploadRequest::default()
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(ARCHIVE_FIELD) => {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                request.archive = Some(bytes.to_vec());
            }
            Some(METADATA_FIELD) => {
                request.metadata = Some(field.text().await.map_err(multipart_error)?);
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    let response = state.pipeline.process(request).await?;
    Ok(Json(response))
}
