pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Job endpoints, mounted at the root next to `/health`.
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(jobs::router())
}
