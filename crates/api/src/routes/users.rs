use axum::routing::get;
use axum::Router;

use crate::handlers::users;
use crate::state::AppState;

/// Routes mounted at `/api/v1/users`.
pub fn router() -> Router<AppState> {
    Router::new().route("/{user_id}/latest", get(users::latest_summary))
}
