// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, BookAppointmentRequest, RegisterDoctorRequest, RegisterPatientRequest,
    SlotWindow, StoreError, UpdateAppointmentRequest, UpdatePatientRequest,
};
use crate::services::availability::{AvailabilityCalculator, ClinicCalendar};
use crate::state::AppState;

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::Rejected(reason) => AppError::Rejected {
                code: reason.code().to_string(),
                message: reason.to_string(),
            },
            AppointmentError::Store(StoreError::Timeout) => AppError::Timeout(error.to_string()),
            AppointmentError::Store(_) => AppError::Unavailable(error.to_string()),
            AppointmentError::InvalidRequest(_) | AppointmentError::InvalidStatusTransition { .. } => {
                AppError::BadRequest(error.to_string())
            }
            AppointmentError::NotFound | AppointmentError::PatientNotFound => {
                AppError::NotFound(error.to_string())
            }
            AppointmentError::PatientAlreadyExists => AppError::Conflict(error.to_string()),
            AppointmentError::Unauthorized => AppError::Forbidden(error.to_string()),
        }
    }
}

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub doctor_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SlotQuery {
    fn window(&self, max_span: Duration) -> Result<SlotWindow, AppError> {
        if self.doctor_id.trim().is_empty() {
            return Err(AppError::BadRequest("doctor_id is required".to_string()));
        }
        if self.from > self.to {
            return Err(AppError::BadRequest("from must not be after to".to_string()));
        }
        if self.to - self.from > max_span {
            return Err(AppError::BadRequest("window is longer than the booking horizon".to_string()));
        }
        Ok(SlotWindow {
            from: self.from,
            to: self.to,
        })
    }
}

// ==============================================================================
// PUBLIC (PATIENT-FACING) HANDLERS
// ==============================================================================

pub async fn list_doctors(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let doctors = state.doctors().list_doctors().await?;
    Ok(Json(json!({ "doctors": doctors })))
}

pub async fn get_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let calendar = ClinicCalendar::new(&state.config.scheduling);
    let window = query.window(calendar.horizon())?;

    let slots: Vec<DateTime<Utc>> = AvailabilityCalculator::new(calendar)
        .generate_slots_for(&query.doctor_id, window)
        .collect();

    Ok(Json(json!({
        "doctor_id": query.doctor_id,
        "slots": slots,
    })))
}

pub async fn get_available_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let calendar = ClinicCalendar::new(&state.config.scheduling);
    let window = query.window(calendar.horizon())?;

    let slots = state
        .availability()
        .available_slots(&query.doctor_id, window, Utc::now())
        .await?;

    Ok(Json(json!({
        "doctor_id": query.doctor_id,
        "available_slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<AppState>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let confirmation = state.booking_coordinator().book(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": confirmation,
            "message": "Appointment booked successfully!"
        })),
    ))
}

// ==============================================================================
// CLINICIAN HANDLERS (authenticated doctor identity)
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment_for_doctor(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let confirmation = state.booking_coordinator().book_for_doctor(&user, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": confirmation,
        })),
    ))
}

pub async fn register_doctor_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    let doctor = state.doctors().register_doctor(&user, request).await?;
    Ok(Json(json!({ "doctor": doctor })))
}

pub async fn get_doctor_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointments = state.lifecycle().doctor_appointments(&user.id).await?;
    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len(),
    })))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .lifecycle()
        .update_clinical_record(&user.id, appointment_id, request)
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn register_patient(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(request): Json<RegisterPatientRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let patient = state.patients().register_patient(&user.id, request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "patient": patient }))))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<String>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    let patient = state
        .patients()
        .update_patient(&user.id, &patient_id, request)
        .await?;
    Ok(Json(json!({ "patient": patient })))
}

pub async fn list_patients(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patients = state.patients().list_patients_for_doctor(&user.id).await?;
    Ok(Json(json!({ "patients": patients })))
}

pub async fn get_patient_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .lifecycle()
        .patient_appointments(&user.id, &patient_id)
        .await?;
    Ok(Json(json!({
        "patient_id": patient_id,
        "appointments": appointments,
    })))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let deletion = state.patients().delete_patient(&user.id, &patient_id).await?;
    Ok(Json(json!({ "deleted": deletion })))
}
