// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use shared_database::{decode, encode, Filter, Transaction};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, Patient,
    RejectionReason, APPOINTMENTS, PATIENTS,
};
use crate::services::availability::ClinicCalendar;

/// Point-in-time view of the store, sufficient to judge one booking.
pub trait StoreSnapshot {
    fn patient_by_id(&self, patient_id: &str) -> Option<&Patient>;

    fn pending_appointments_by_patient(&self, patient_id: &str) -> Vec<&Appointment>;

    fn appointments_by_doctor_and_start(
        &self,
        doctor_id: &str,
        start: DateTime<Utc>,
    ) -> Vec<&Appointment>;
}

/// Snapshot holding just the documents a booking depends on.
#[derive(Debug, Clone, Default)]
pub struct BookingSnapshot {
    patient: Option<Patient>,
    appointments: Vec<Appointment>,
}

impl BookingSnapshot {
    pub fn with_patient(mut self, patient: Patient) -> Self {
        self.patient = Some(patient);
        self
    }

    pub fn with_appointment(mut self, appointment: Appointment) -> Self {
        if !self.appointments.iter().any(|a| a.id == appointment.id) {
            self.appointments.push(appointment);
        }
        self
    }

    /// Reads the patient record, the patient's pending appointments and the
    /// requested slot through `tx`, so all three join the transaction's read set.
    pub async fn read(
        tx: &mut dyn Transaction,
        request: &BookAppointmentRequest,
    ) -> Result<Self, AppointmentError> {
        let mut snapshot = BookingSnapshot::default();

        if let Some(document) = tx.get(PATIENTS, &request.patient_id).await? {
            snapshot = snapshot.with_patient(decode(document)?);
        }

        let pending = tx
            .query(
                APPOINTMENTS,
                &[
                    Filter::eq("patient_id", request.patient_id.as_str()),
                    Filter::eq("status", encode(&AppointmentStatus::Pending)?),
                ],
            )
            .await?;

        let same_slot = tx
            .query(
                APPOINTMENTS,
                &[
                    Filter::eq("doctor_id", request.doctor_id.as_str()),
                    Filter::eq("start", encode(&request.start)?),
                ],
            )
            .await?;

        for document in pending.into_iter().chain(same_slot) {
            snapshot = snapshot.with_appointment(document.decode()?);
        }

        debug!(
            "Snapshot for patient {}: record={}, {} related appointments",
            request.patient_id,
            snapshot.patient.is_some(),
            snapshot.appointments.len()
        );
        Ok(snapshot)
    }
}

impl StoreSnapshot for BookingSnapshot {
    fn patient_by_id(&self, patient_id: &str) -> Option<&Patient> {
        self.patient.as_ref().filter(|p| p.id == patient_id)
    }

    fn pending_appointments_by_patient(&self, patient_id: &str) -> Vec<&Appointment> {
        self.appointments
            .iter()
            .filter(|a| a.patient_id == patient_id && a.is_pending())
            .collect()
    }

    fn appointments_by_doctor_and_start(
        &self,
        doctor_id: &str,
        start: DateTime<Utc>,
    ) -> Vec<&Appointment> {
        self.appointments
            .iter()
            .filter(|a| a.doctor_id == doctor_id && a.start == start)
            .collect()
    }
}

/// Decides whether a booking may proceed. Checks run in a fixed order and the
/// first failure is reported.
#[derive(Debug, Clone, Copy)]
pub struct ConflictValidator {
    calendar: ClinicCalendar,
}

impl ConflictValidator {
    pub fn new(calendar: ClinicCalendar) -> Self {
        Self { calendar }
    }

    pub fn validate(
        &self,
        request: &BookAppointmentRequest,
        snapshot: &dyn StoreSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), RejectionReason> {
        let outcome = self.first_violation(request, snapshot, now);
        if let Err(reason) = outcome {
            warn!(
                "Booking rejected for patient {} with doctor {} at {}: {}",
                request.patient_id,
                request.doctor_id,
                request.start,
                reason.code()
            );
        }
        outcome
    }

    fn first_violation(
        &self,
        request: &BookAppointmentRequest,
        snapshot: &dyn StoreSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), RejectionReason> {
        if !self.calendar.is_bookable_slot(request.start) {
            return Err(RejectionReason::OutOfHours);
        }

        if !self.calendar.is_within_horizon(request.start, now) {
            return Err(RejectionReason::OutsideBookingWindow);
        }

        // No record yet is fine: the coordinator creates one.
        if let Some(patient) = snapshot.patient_by_id(&request.patient_id) {
            if patient.name != request.patient_name {
                return Err(RejectionReason::IdentityMismatch);
            }
        }

        if !snapshot.pending_appointments_by_patient(&request.patient_id).is_empty() {
            return Err(RejectionReason::AlreadyHasPendingAppointment);
        }

        if !snapshot
            .appointments_by_doctor_and_start(&request.doctor_id, request.start)
            .is_empty()
        {
            return Err(RejectionReason::SlotAlreadyBooked);
        }

        Ok(())
    }
}
