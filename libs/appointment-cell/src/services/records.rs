// libs/appointment-cell/src/services/records.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use shared_database::{decode, encode, DocumentStore, Filter};
use shared_models::auth::User;

use crate::models::{
    AppointmentError, Doctor, Patient, PatientDeletion, RegisterDoctorRequest,
    RegisterPatientRequest, UpdatePatientRequest, APPOINTMENTS, DOCTORS, PATIENTS,
};

pub struct PatientRecordService {
    store: Arc<dyn DocumentStore>,
}

impl PatientRecordService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Explicit registration from a doctor's patient list. The national ID
    /// is the record key, so a second registration of the same ID fails.
    pub async fn register_patient(
        &self,
        doctor_id: &str,
        request: RegisterPatientRequest,
    ) -> Result<Patient, AppointmentError> {
        request.check_well_formed()?;

        let mut tx = self.store.begin().await?;
        if tx.get(PATIENTS, &request.id).await?.is_some() {
            warn!("Patient {} already registered", request.id);
            tx.abort().await;
            return Err(AppointmentError::PatientAlreadyExists);
        }

        let patient = Patient {
            id: request.id,
            name: request.name,
            doctor_id: doctor_id.to_string(),
            created_at: Utc::now(),
            details: request.details,
        };
        tx.set(PATIENTS, &patient.id, encode(&patient)?);
        tx.commit().await?;

        info!("Patient {} registered by doctor {}", patient.id, doctor_id);
        Ok(patient)
    }

    /// Owner-only edit. Runs in a transaction, so a booking that read the
    /// old name conflicts and is re-validated against the new one.
    pub async fn update_patient(
        &self,
        doctor_id: &str,
        patient_id: &str,
        request: UpdatePatientRequest,
    ) -> Result<Patient, AppointmentError> {
        request.check_well_formed()?;

        let mut tx = self.store.begin().await?;
        let mut patient: Patient = match tx.get(PATIENTS, patient_id).await? {
            Some(document) => decode(document)?,
            None => {
                tx.abort().await;
                return Err(AppointmentError::PatientNotFound);
            }
        };
        if patient.doctor_id != doctor_id {
            warn!("Doctor {} tried to edit patient {} of another doctor", doctor_id, patient_id);
            tx.abort().await;
            return Err(AppointmentError::Unauthorized);
        }

        if let Some(name) = request.name {
            patient.name = name;
        }
        patient.details.extend(request.details);

        tx.set(PATIENTS, patient_id, encode(&patient)?);
        tx.commit().await?;

        info!("Patient {} updated by doctor {}", patient_id, doctor_id);
        Ok(patient)
    }

    pub async fn get_patient(&self, patient_id: &str) -> Result<Patient, AppointmentError> {
        match self.store.get(PATIENTS, patient_id).await? {
            Some(document) => Ok(decode(document)?),
            None => Err(AppointmentError::PatientNotFound),
        }
    }

    pub async fn list_patients_for_doctor(&self, doctor_id: &str) -> Result<Vec<Patient>, AppointmentError> {
        let patients = self
            .store
            .query(PATIENTS, &[Filter::eq("doctor_id", doctor_id)])
            .await?
            .into_iter()
            .map(|doc| doc.decode::<Patient>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    /// Removes the patient and every appointment booked under their ID, in
    /// one transaction.
    pub async fn delete_patient(
        &self,
        doctor_id: &str,
        patient_id: &str,
    ) -> Result<PatientDeletion, AppointmentError> {
        let mut tx = self.store.begin().await?;

        let patient: Patient = match tx.get(PATIENTS, patient_id).await? {
            Some(document) => decode(document)?,
            None => {
                tx.abort().await;
                return Err(AppointmentError::PatientNotFound);
            }
        };
        if patient.doctor_id != doctor_id {
            tx.abort().await;
            return Err(AppointmentError::Unauthorized);
        }

        let appointments = tx
            .query(APPOINTMENTS, &[Filter::eq("patient_id", patient_id)])
            .await?;
        let appointments_removed = appointments.len();

        for appointment in &appointments {
            tx.delete(APPOINTMENTS, &appointment.key);
        }
        tx.delete(PATIENTS, patient_id);
        tx.commit().await?;

        info!("Patient {} deleted with {} appointments", patient_id, appointments_removed);
        Ok(PatientDeletion {
            patient_id: patient_id.to_string(),
            appointments_removed,
        })
    }
}

pub struct DoctorDirectoryService {
    store: Arc<dyn DocumentStore>,
}

impl DoctorDirectoryService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn register_doctor(
        &self,
        identity: &User,
        request: RegisterDoctorRequest,
    ) -> Result<Doctor, AppointmentError> {
        if request.name.trim().is_empty() {
            return Err(AppointmentError::InvalidRequest("doctor name is required".to_string()));
        }

        let doctor = Doctor {
            id: identity.id.clone(),
            name: request.name,
            specialty: request.specialty,
        };

        let mut tx = self.store.begin().await?;
        tx.set(DOCTORS, &doctor.id, encode(&doctor)?);
        tx.commit().await?;

        debug!("Doctor profile {} saved", doctor.id);
        Ok(doctor)
    }

    pub async fn list_doctors(&self) -> Result<Vec<Doctor>, AppointmentError> {
        let mut doctors = self
            .store
            .query(DOCTORS, &[])
            .await?
            .into_iter()
            .map(|doc| doc.decode::<Doctor>())
            .collect::<Result<Vec<_>, _>>()?;

        doctors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(doctors)
    }
}
