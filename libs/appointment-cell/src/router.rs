// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::state::AppState;

pub fn appointment_routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/doctors", get(handlers::list_doctors))
        .route("/appointments/slots", get(handlers::get_slots))
        .route("/appointments/available", get(handlers::get_available_slots))
        .route("/appointments/book", post(handlers::book_appointment));

    // Clinician routes: the token subject is the doctor id
    let protected_routes = Router::new()
        .route("/doctors/me", post(handlers::register_doctor_profile))
        .route("/appointments/doctor", get(handlers::get_doctor_appointments))
        .route("/appointments/doctor/book", post(handlers::book_appointment_for_doctor))
        .route("/appointments/{appointment_id}", patch(handlers::update_appointment))
        .route("/patients", post(handlers::register_patient).get(handlers::list_patients))
        .route(
            "/patients/{patient_id}",
            patch(handlers::update_patient).delete(handlers::delete_patient),
        )
        .route("/patients/{patient_id}/appointments", get(handlers::get_patient_appointments))
        .route_layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
