// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use shared_database::DatabaseError;

pub const APPOINTMENTS: &str = "appointments";
pub const PATIENTS: &str = "patients";
pub const DOCTORS: &str = "doctors";

// ==============================================================================
// CORE SCHEDULING MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: String,
    pub name: String,
    pub specialty: String,
}

/// Patient keyed by national ID; one record per ID value across the clinic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    /// Doctor whose list the record was created from.
    pub doctor_id: String,
    pub created_at: DateTime<Utc>,
    /// Record fields owned by the patient-records collaborator, kept as-is.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Patient {
    /// Keys the record itself owns. Free-form details may not use them.
    pub const RESERVED_FIELDS: [&'static str; 4] = ["id", "name", "doctor_id", "created_at"];
}

fn check_patient_details(details: &Map<String, Value>) -> Result<(), AppointmentError> {
    match details
        .keys()
        .find(|key| Patient::RESERVED_FIELDS.contains(&key.as_str()))
    {
        Some(key) => Err(AppointmentError::InvalidRequest(format!(
            "{} cannot be set as a patient detail",
            key
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: String,
    pub patient_id: String,
    /// Copy of the patient's name at booking time; display only.
    pub patient_name: String,
    pub start: DateTime<Utc>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub prescribed_medicine: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn pending(request: &BookAppointmentRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            doctor_id: request.doctor_id.clone(),
            patient_id: request.patient_id.clone(),
            patient_name: request.patient_name.clone(),
            start: request.start,
            status: AppointmentStatus::Pending,
            reason: request.reason.clone().unwrap_or_default(),
            notes: String::new(),
            prescribed_medicine: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == AppointmentStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Done,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Done => write!(f, "done"),
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BookAppointmentRequest {
    /// Catches malformed requests before any store access.
    pub fn check_well_formed(&self) -> Result<(), AppointmentError> {
        if self.doctor_id.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest("doctor_id is required".to_string()));
        }
        if self.patient_id.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest("patient_id is required".to_string()));
        }
        if self.patient_name.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest("patient_name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub appointment: Appointment,
    pub patient_created: bool,
    /// Views that are stale after this booking and should be re-fetched.
    pub invalidated: Vec<InvalidatedView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum InvalidatedView {
    DoctorSchedule { doctor_id: String, date: NaiveDate },
    PatientAppointments { patient_id: String },
    DoctorPatients { doctor_id: String },
}

impl InvalidatedView {
    pub fn after_booking(appointment: &Appointment, patient_created: bool) -> Vec<Self> {
        let mut views = vec![
            InvalidatedView::DoctorSchedule {
                doctor_id: appointment.doctor_id.clone(),
                date: appointment.start.date_naive(),
            },
            InvalidatedView::PatientAppointments {
                patient_id: appointment.patient_id.clone(),
            },
        ];
        if patient_created {
            views.push(InvalidatedView::DoctorPatients {
                doctor_id: appointment.doctor_id.clone(),
            });
        }
        views
    }
}

/// Staff edit of an existing appointment. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub prescribed_medicine: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPatientRequest {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RegisterPatientRequest {
    pub fn check_well_formed(&self) -> Result<(), AppointmentError> {
        if self.id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest(
                "patient id and name are required".to_string(),
            ));
        }
        check_patient_details(&self.details)
    }
}

/// Edit of a patient record. Absent fields are left unchanged; detail keys
/// present in the request replace the stored ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl UpdatePatientRequest {
    pub fn check_well_formed(&self) -> Result<(), AppointmentError> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(AppointmentError::InvalidRequest("patient name cannot be empty".to_string()));
        }
        check_patient_details(&self.details)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDoctorRequest {
    pub name: String,
    pub specialty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientDeletion {
    pub patient_id: String,
    pub appointments_removed: usize,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// Expected, user-facing reasons a booking is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("The requested time is outside clinic hours or not on a slot boundary.")]
    OutOfHours,

    #[error("Appointments can only be booked within the upcoming booking window.")]
    OutsideBookingWindow,

    #[error("The patient name does not match the national ID on record.")]
    IdentityMismatch,

    #[error("You already have a pending appointment.")]
    AlreadyHasPendingAppointment,

    #[error("This time slot is already booked. Please choose another time.")]
    SlotAlreadyBooked,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::OutOfHours => "out_of_hours",
            RejectionReason::OutsideBookingWindow => "outside_booking_window",
            RejectionReason::IdentityMismatch => "identity_mismatch",
            RejectionReason::AlreadyHasPendingAppointment => "already_has_pending_appointment",
            RejectionReason::SlotAlreadyBooked => "slot_already_booked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("The booking could not be committed because of concurrent bookings")]
    Contention,

    #[error("The booking did not complete in time")]
    Timeout,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error(transparent)]
    Rejected(#[from] RejectionReason),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("A patient with this national ID already exists")]
    PatientAlreadyExists,

    #[error("Appointment status cannot change from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Unauthorized access to appointment")]
    Unauthorized,
}

impl From<DatabaseError> for AppointmentError {
    fn from(error: DatabaseError) -> Self {
        if error.is_contention() {
            AppointmentError::Store(StoreError::Contention)
        } else {
            AppointmentError::Store(StoreError::Unavailable(error.to_string()))
        }
    }
}
