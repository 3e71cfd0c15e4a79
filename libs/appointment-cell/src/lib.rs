pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use router::appointment_routes;
pub use state::{scheduler_store, AppState};

pub mod api {
    pub use crate::services::availability::{AvailabilityCalculator, AvailabilityService, ClinicCalendar, SlotIter};
    pub use crate::services::booking::BookingCoordinator;
    pub use crate::services::conflict::{BookingSnapshot, ConflictValidator, StoreSnapshot};
    pub use crate::services::lifecycle::AppointmentLifecycleService;
    pub use crate::services::records::{DoctorDirectoryService, PatientRecordService};
}
