use axum::routing::post;
use axum::Router;

use crate::handlers::sessions;
use crate::state::AppState;

/// Routes mounted at `/api/v1/sessions`.
///
/// ```text
/// POST /upload    upload
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/upload", post(sessions::upload))
}
