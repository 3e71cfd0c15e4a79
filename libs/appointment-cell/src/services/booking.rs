// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Map;
use tracing::{debug, error, info, instrument, warn};

use shared_config::SchedulingConfig;
use shared_database::{encode, DocumentStore};
use shared_models::auth::User;

use crate::models::{
    Appointment, AppointmentError, BookAppointmentRequest, BookingConfirmation, InvalidatedView,
    Patient, StoreError, APPOINTMENTS, DOCTORS, PATIENTS,
};
use crate::services::availability::ClinicCalendar;
use crate::services::conflict::{BookingSnapshot, ConflictValidator, StoreSnapshot};

/// Sole writer of new appointments. Each attempt reads a fresh snapshot,
/// validates it and commits inside one store transaction; commit conflicts
/// restart the attempt.
pub struct BookingCoordinator {
    store: Arc<dyn DocumentStore>,
    validator: ConflictValidator,
    max_attempts: u32,
    timeout: Duration,
}

impl BookingCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, config: &SchedulingConfig) -> Self {
        let config = config.checked();
        Self {
            store,
            validator: ConflictValidator::new(ClinicCalendar::new(&config)),
            max_attempts: config.max_commit_attempts,
            timeout: Duration::from_millis(config.booking_timeout_ms),
        }
    }

    pub async fn book(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookingConfirmation, AppointmentError> {
        self.book_at(request, Utc::now()).await
    }

    /// Clinician-facing booking: the doctor is whoever is signed in.
    pub async fn book_for_doctor(
        &self,
        identity: &User,
        mut request: BookAppointmentRequest,
    ) -> Result<BookingConfirmation, AppointmentError> {
        if !identity.is_doctor() {
            return Err(AppointmentError::Unauthorized);
        }
        request.doctor_id = identity.id.clone();
        self.book(request).await
    }

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, patient_id = %request.patient_id, start = %request.start))]
    pub async fn book_at(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingConfirmation, AppointmentError> {
        request.check_well_formed()?;

        match tokio::time::timeout(self.timeout, self.book_with_retries(&request, now)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Booking exceeded its {:?} budget and was abandoned", self.timeout);
                Err(StoreError::Timeout.into())
            }
        }
    }

    async fn book_with_retries(
        &self,
        request: &BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingConfirmation, AppointmentError> {
        for attempt in 1..=self.max_attempts {
            debug!("Booking attempt {}/{}", attempt, self.max_attempts);

            match self.try_book(request, now).await {
                Err(AppointmentError::Store(StoreError::Contention)) if attempt < self.max_attempts => {
                    warn!("Booking commit conflicted, retrying attempt {}/{}", attempt, self.max_attempts);
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                }
                Err(AppointmentError::Store(StoreError::Contention)) => break,
                outcome => return outcome,
            }
        }

        error!("Booking still contended after {} attempts", self.max_attempts);
        Err(StoreError::Contention.into())
    }

    async fn try_book(
        &self,
        request: &BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingConfirmation, AppointmentError> {
        let mut tx = self.store.begin().await?;

        if tx.get(DOCTORS, &request.doctor_id).await?.is_none() {
            warn!("Booking requested for unknown doctor {}", request.doctor_id);
            tx.abort().await;
            return Err(AppointmentError::InvalidRequest(format!(
                "unknown doctor {}",
                request.doctor_id
            )));
        }

        let snapshot = BookingSnapshot::read(tx.as_mut(), request).await?;
        if let Err(reason) = self.validator.validate(request, &snapshot, now) {
            tx.abort().await;
            return Err(reason.into());
        }

        let patient_created = snapshot.patient_by_id(&request.patient_id).is_none();
        if patient_created {
            let patient = Patient {
                id: request.patient_id.clone(),
                name: request.patient_name.clone(),
                doctor_id: request.doctor_id.clone(),
                created_at: now,
                details: Map::new(),
            };
            tx.set(PATIENTS, &patient.id, encode(&patient)?);
        }

        let appointment = Appointment::pending(request, now);
        tx.set(APPOINTMENTS, &appointment.id.to_string(), encode(&appointment)?);

        tx.commit().await?;

        info!(
            "Appointment {} booked for patient {} with doctor {} at {}{}",
            appointment.id,
            appointment.patient_id,
            appointment.doctor_id,
            appointment.start,
            if patient_created { " (new patient record)" } else { "" }
        );

        Ok(BookingConfirmation {
            invalidated: InvalidatedView::after_booking(&appointment, patient_created),
            appointment,
            patient_created,
        })
    }
}
