use crate::shared::state::AppState;
use axum::Router;
use std::sync::Arc;

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(crate::campaign::configure_routes())
        .merge(crate::sequence::configure_routes())
        .merge(crate::tracking::configure_routes())
        .with_state(state)
}
