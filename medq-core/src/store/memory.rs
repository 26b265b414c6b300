use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use medq_model::{AppointmentID, ClinicID, QueueEntry, QueueID, QueueStatus};

use crate::error::{QueueError, Result};
use crate::store::QueueStore;

/// HashMap-backed store for tests and demo mode. Applies the same canonical
/// ordering as the Postgres store so the engine behaves identically against
/// either.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<QueueID, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<QueueID, QueueEntry>>> {
        self.entries
            .read()
            .map_err(|_| QueueError::Store("queue store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<QueueID, QueueEntry>>> {
        self.entries
            .write()
            .map_err(|_| QueueError::Store("queue store lock poisoned".to_string()))
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry> {
        self.write()?.insert(entry.queue_id, entry.clone());
        Ok(entry)
    }

    async fn get(&self, queue_id: QueueID) -> Result<Option<QueueEntry>> {
        Ok(self.read()?.get(&queue_id).cloned())
    }

    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let mut entries = self.write()?;
        if !entries.contains_key(&entry.queue_id) {
            return Err(QueueError::EntryNotFound(entry.queue_id));
        }
        entries.insert(entry.queue_id, entry.clone());
        Ok(entry.clone())
    }

    async fn list_by_clinic_and_status_ordered(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>> {
        let mut entries = self.list_by_clinic_and_status(clinic_id, status).await?;
        entries.sort_by(QueueEntry::queue_ordering);
        Ok(entries)
    }

    async fn list_by_clinic_and_status(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>> {
        Ok(self
            .read()?
            .values()
            .filter(|e| e.clinic_id == clinic_id && e.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<Option<QueueEntry>> {
        Ok(self
            .read()?
            .values()
            .find(|e| e.appointment_id == appointment_id && e.status == status)
            .cloned())
    }

    async fn exists_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<bool> {
        Ok(self
            .read()?
            .values()
            .any(|e| e.appointment_id == appointment_id && e.status == status))
    }

    async fn list_by_appointment(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .read()?
            .values()
            .filter(|e| e.appointment_id == appointment_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}
