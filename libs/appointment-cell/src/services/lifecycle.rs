// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::{decode, encode, DocumentStore, Filter};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, UpdateAppointmentRequest, APPOINTMENTS,
};

/// Staff-side edits of existing appointments and the listings behind the
/// doctor's dashboard.
pub struct AppointmentLifecycleService {
    store: Arc<dyn DocumentStore>,
}

impl AppointmentLifecycleService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Pending may become done; done is final.
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        match (current_status, new_status) {
            (from, to) if from == to => Ok(()),
            (AppointmentStatus::Pending, AppointmentStatus::Done) => Ok(()),
            (from, to) => {
                warn!("Invalid status transition attempted: {} -> {}", from, to);
                Err(AppointmentError::InvalidStatusTransition { from, to })
            }
        }
    }

    pub async fn update_clinical_record(
        &self,
        doctor_id: &str,
        appointment_id: Uuid,
        update: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment {} for doctor {}", appointment_id, doctor_id);

        let key = appointment_id.to_string();
        let mut tx = self.store.begin().await?;

        let mut appointment: Appointment = match tx.get(APPOINTMENTS, &key).await? {
            Some(document) => decode(document)?,
            None => {
                tx.abort().await;
                return Err(AppointmentError::NotFound);
            }
        };

        if appointment.doctor_id != doctor_id {
            warn!("Doctor {} tried to edit appointment {} of another doctor", doctor_id, appointment_id);
            tx.abort().await;
            return Err(AppointmentError::Unauthorized);
        }

        if let Some(status) = update.status {
            if let Err(error) = self.validate_status_transition(appointment.status, status) {
                tx.abort().await;
                return Err(error);
            }
            appointment.status = status;
        }
        if let Some(reason) = update.reason {
            appointment.reason = reason;
        }
        if let Some(notes) = update.notes {
            appointment.notes = notes;
        }
        if let Some(prescribed_medicine) = update.prescribed_medicine {
            appointment.prescribed_medicine = prescribed_medicine;
        }
        appointment.updated_at = Utc::now();

        tx.set(APPOINTMENTS, &key, encode(&appointment)?);
        tx.commit().await?;

        info!("Appointment {} updated (status {})", appointment_id, appointment.status);
        Ok(appointment)
    }

    pub async fn doctor_appointments(&self, doctor_id: &str) -> Result<Vec<Appointment>, AppointmentError> {
        self.list(&[Filter::eq("doctor_id", doctor_id)]).await
    }

    pub async fn patient_appointments(
        &self,
        doctor_id: &str,
        patient_id: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list(&[
            Filter::eq("doctor_id", doctor_id),
            Filter::eq("patient_id", patient_id),
        ])
        .await
    }

    async fn list(&self, filters: &[Filter]) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self
            .store
            .query(APPOINTMENTS, filters)
            .await?
            .into_iter()
            .map(|doc| doc.decode::<Appointment>())
            .collect::<Result<Vec<_>, _>>()?;

        appointments.sort_by_key(|a| a.start);
        Ok(appointments)
    }
}
