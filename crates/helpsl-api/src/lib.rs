pub mod records;
pub mod state;

use axum::{
    Router,
    routing::{get, patch},
};

use crate::state::AppState;

/// REST surface: query, insert and status update for both tables.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/rest/{table}",
            get(records::list_records).post(records::create_record),
        )
        .route(
            "/rest/requests/{id}/status",
            patch(records::update_request_status),
        )
        .with_state(state)
}
