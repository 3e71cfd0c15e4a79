#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use appointment_cell::models::{BookAppointmentRequest, Doctor, APPOINTMENTS, DOCTORS};
use appointment_cell::scheduler_store;
use shared_database::{
    encode, DatabaseError, DocumentStore, Filter, MemoryStore, StoredDocument, Transaction,
};

/// Saturday 2024-06-01 10:00 UTC.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
}

/// Monday 2024-06-03 at the given UTC time.
pub fn monday_at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
}

pub fn request(doctor_id: &str, patient_id: &str, patient_name: &str, start: DateTime<Utc>) -> BookAppointmentRequest {
    BookAppointmentRequest {
        doctor_id: doctor_id.to_string(),
        patient_id: patient_id.to_string(),
        patient_name: patient_name.to_string(),
        start,
        reason: Some("Consultation".to_string()),
    }
}

/// Saves directory entries for doctors D1 and D2.
pub async fn with_doctors(store: MemoryStore) -> MemoryStore {
    add_doctors(&store, &["D1", "D2"]).await;
    store
}

pub async fn add_doctors(store: &MemoryStore, ids: &[&str]) {
    let mut tx = store.begin().await.unwrap();
    for id in ids {
        let doctor = Doctor {
            id: id.to_string(),
            name: format!("Dr. {}", id),
            specialty: "General practice".to_string(),
        };
        tx.set(DOCTORS, id, encode(&doctor).unwrap());
    }
    tx.commit().await.unwrap();
}

pub async fn store() -> Arc<MemoryStore> {
    Arc::new(with_doctors(scheduler_store()).await)
}

/// Forwards to a real store but fails the first `conflicts` commits.
pub struct ContendedStore {
    pub inner: MemoryStore,
    pub conflicts: Arc<AtomicU32>,
    pub commits_attempted: Arc<AtomicU32>,
    pub aborts: Arc<AtomicU32>,
}

impl ContendedStore {
    pub async fn new(conflicts: u32) -> Self {
        Self {
            inner: with_doctors(scheduler_store()).await,
            conflicts: Arc::new(AtomicU32::new(conflicts)),
            commits_attempted: Arc::new(AtomicU32::new(0)),
            aborts: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct ContendedTransaction {
    inner: Box<dyn Transaction>,
    conflicts: Arc<AtomicU32>,
    commits_attempted: Arc<AtomicU32>,
    aborts: Arc<AtomicU32>,
}

#[async_trait]
impl Transaction for ContendedTransaction {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }

    async fn query(&mut self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, DatabaseError> {
        self.inner.query(collection, filters).await
    }

    fn set(&mut self, collection: &str, key: &str, document: Value) {
        self.inner.set(collection, key, document)
    }

    fn delete(&mut self, collection: &str, key: &str) {
        self.inner.delete(collection, key)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.commits_attempted.fetch_add(1, Ordering::SeqCst);
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(DatabaseError::Conflict);
        }
        self.inner.commit().await
    }

    async fn abort(self: Box<Self>) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        Ok(Box::new(ContendedTransaction {
            inner: self.inner.begin().await?,
            conflicts: Arc::clone(&self.conflicts),
            commits_attempted: Arc::clone(&self.commits_attempted),
            aborts: Arc::clone(&self.aborts),
        }))
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, DatabaseError> {
        self.inner.query(collection, filters).await
    }
}

/// Store whose transactions take `delay` to start, or fail outright.
pub struct DegradedStore {
    pub inner: MemoryStore,
    pub delay: Duration,
    pub down: bool,
}

#[async_trait]
impl DocumentStore for DegradedStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        if self.down {
            return Err(DatabaseError::Unavailable("connection refused".to_string()));
        }
        tokio::time::sleep(self.delay).await;
        self.inner.begin().await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, DatabaseError> {
        self.inner.query(collection, filters).await
    }
}

/// The first `stale` transactions see no appointments at all, as if their
/// snapshot predates every booking. Their reads are still recorded, so only
/// the unique index can stop a duplicate slot.
pub struct StaleSnapshotStore {
    pub inner: MemoryStore,
    pub stale: Arc<AtomicU32>,
    pub commits_attempted: Arc<AtomicU32>,
}

impl StaleSnapshotStore {
    pub fn new(inner: MemoryStore, stale: u32) -> Self {
        Self {
            inner,
            stale: Arc::new(AtomicU32::new(stale)),
            commits_attempted: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct StaleSnapshotTransaction {
    inner: Box<dyn Transaction>,
    hide_appointments: bool,
    commits_attempted: Arc<AtomicU32>,
}

#[async_trait]
impl Transaction for StaleSnapshotTransaction {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }

    async fn query(&mut self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, DatabaseError> {
        let documents = self.inner.query(collection, filters).await?;
        if self.hide_appointments && collection == APPOINTMENTS {
            return Ok(Vec::new());
        }
        Ok(documents)
    }

    fn set(&mut self, collection: &str, key: &str, document: Value) {
        self.inner.set(collection, key, document)
    }

    fn delete(&mut self, collection: &str, key: &str) {
        self.inner.delete(collection, key)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.commits_attempted.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn abort(self: Box<Self>) {
        self.inner.abort().await
    }
}

#[async_trait]
impl DocumentStore for StaleSnapshotStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        let hide_appointments = self
            .stale
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(Box::new(StaleSnapshotTransaction {
            inner: self.inner.begin().await?,
            hide_appointments,
            commits_attempted: Arc::clone(&self.commits_attempted),
        }))
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get(collection, key).await
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredDocument>, DatabaseError> {
        self.inner.query(collection, filters).await
    }
}
