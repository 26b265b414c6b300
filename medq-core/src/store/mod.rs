//! Persistence contract for queue entries.
//!
//! The trait enumerates exactly the query shapes the engine needs; nothing
//! here assumes ORM semantics. Postgres is the system of record in
//! production, the in-memory store backs tests and demo mode.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use medq_model::{AppointmentID, ClinicID, QueueEntry, QueueID, QueueStatus};

pub use memory::InMemoryQueueStore;
pub use postgres::PostgresQueueStore;

use crate::error::Result;

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new entry.
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry>;

    /// Look up one entry by id.
    async fn get(&self, queue_id: QueueID) -> Result<Option<QueueEntry>>;

    /// Persist mutations to an existing entry (matched by `queue_id`).
    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry>;

    /// Entries for a clinic in a given status, ordered by priority
    /// descending then check-in time ascending. This is the canonical queue
    /// ordering.
    async fn list_by_clinic_and_status_ordered(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>>;

    /// Entries for a clinic in a given status, no ordering guarantee.
    async fn list_by_clinic_and_status(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>>;

    /// The entry for an appointment in a given status, if any.
    async fn find_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<Option<QueueEntry>>;

    /// Whether any entry exists for an appointment in a given status.
    async fn exists_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<bool>;

    /// Full queue history for an appointment, oldest first.
    async fn list_by_appointment(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<Vec<QueueEntry>>;
}
