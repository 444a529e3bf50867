use axum::extract::{Path, State};
use axum::Json;
use replay_core::storage::storage_key;
use replay_core::types::LatestUserSummary;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/users/{user_id}/latest
///
/// Return the rolling summary of the user's completed sessions.
pub async fn latest_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<DataResponse<LatestUserSummary>>> {
    let user_key = storage_key(&user_id)?;
    let summary = state
        .pipeline
        .store()
        .read_summary(&user_key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No sessions recorded for user {user_id}")))?;

    Ok(Json(DataResponse { data: summary }))
}
