use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic Scheduler API is running!" }))
        .merge(appointment_routes(state))
}
