use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::{DocumentStore, MemoryStore};

use crate::models::APPOINTMENTS;
use crate::services::availability::AvailabilityService;
use crate::services::booking::BookingCoordinator;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::records::{DoctorDirectoryService, PatientRecordService};

/// In-memory store with the `(doctor_id, start)` key that backs the
/// no-double-booking rule at commit time.
pub fn scheduler_store() -> MemoryStore {
    MemoryStore::new().with_unique_index(APPOINTMENTS, &["doctor_id", "start"])
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self { config, store }
    }

    pub fn in_memory(config: Arc<AppConfig>) -> Self {
        Self::new(config, Arc::new(scheduler_store()))
    }

    pub fn booking_coordinator(&self) -> BookingCoordinator {
        BookingCoordinator::new(Arc::clone(&self.store), &self.config.scheduling)
    }

    pub fn availability(&self) -> AvailabilityService {
        AvailabilityService::new(Arc::clone(&self.store), &self.config.scheduling)
    }

    pub fn lifecycle(&self) -> AppointmentLifecycleService {
        AppointmentLifecycleService::new(Arc::clone(&self.store))
    }

    pub fn patients(&self) -> PatientRecordService {
        PatientRecordService::new(Arc::clone(&self.store))
    }

    pub fn doctors(&self) -> DoctorDirectoryService {
        DoctorDirectoryService::new(Arc::clone(&self.store))
    }
}
