use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medq_model::{
    AppointmentID, ClinicID, Priority, QueueEntry, QueueID, QueueStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::store::QueueStore;

/// Postgres-backed queue store over the `queue_log` table.
///
/// Queries are runtime-checked on purpose: the build must not depend on a
/// live database.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueEntryRow {
    queue_id: Uuid,
    clinic_id: Uuid,
    appointment_id: Uuid,
    status: String,
    priority: i16,
    created_at: DateTime<Utc>,
    called_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = QueueError;

    fn try_from(row: QueueEntryRow) -> Result<QueueEntry> {
        let status: QueueStatus = row
            .status
            .parse()
            .map_err(|_| QueueError::Store(format!("corrupt status in row: {}", row.status)))?;
        let priority = Priority::try_from(row.priority)
            .map_err(|_| QueueError::Store(format!("corrupt priority in row: {}", row.priority)))?;
        Ok(QueueEntry {
            queue_id: QueueID(row.queue_id),
            clinic_id: ClinicID(row.clinic_id),
            appointment_id: AppointmentID(row.appointment_id),
            status,
            priority,
            created_at: row.created_at,
            called_at: row.called_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "queue_id, clinic_id, appointment_id, status, priority, created_at, called_at";

fn rows_to_entries(rows: Vec<QueueEntryRow>) -> Result<Vec<QueueEntry>> {
    rows.into_iter().map(QueueEntry::try_from).collect()
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry> {
        sqlx::query(
            r#"
            INSERT INTO queue_log (queue_id, clinic_id, appointment_id, status, priority, created_at, called_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.queue_id.to_uuid())
        .bind(entry.clinic_id.to_uuid())
        .bind(entry.appointment_id.to_uuid())
        .bind(entry.status.as_str())
        .bind(entry.priority.as_i16())
        .bind(entry.created_at)
        .bind(entry.called_at)
        .execute(self.pool())
        .await?;

        Ok(entry)
    }

    async fn get(&self, queue_id: QueueID) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_log WHERE queue_id = $1"
        ))
        .bind(queue_id.to_uuid())
        .fetch_optional(self.pool())
        .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    async fn update(&self, entry: &QueueEntry) -> Result<QueueEntry> {
        let result = sqlx::query(
            r#"
            UPDATE queue_log
            SET status = $2, priority = $3, created_at = $4, called_at = $5
            WHERE queue_id = $1
            "#,
        )
        .bind(entry.queue_id.to_uuid())
        .bind(entry.status.as_str())
        .bind(entry.priority.as_i16())
        .bind(entry.created_at)
        .bind(entry.called_at)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::EntryNotFound(entry.queue_id));
        }
        Ok(entry.clone())
    }

    async fn list_by_clinic_and_status_ordered(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_log \
             WHERE clinic_id = $1 AND status = $2 \
             ORDER BY priority DESC, created_at ASC"
        ))
        .bind(clinic_id.to_uuid())
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;

        rows_to_entries(rows)
    }

    async fn list_by_clinic_and_status(
        &self,
        clinic_id: ClinicID,
        status: QueueStatus,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_log WHERE clinic_id = $1 AND status = $2"
        ))
        .bind(clinic_id.to_uuid())
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;

        rows_to_entries(rows)
    }

    async fn find_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_log \
             WHERE appointment_id = $1 AND status = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(appointment_id.to_uuid())
        .bind(status.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    async fn exists_by_appointment_and_status(
        &self,
        appointment_id: AppointmentID,
        status: QueueStatus,
    ) -> Result<bool> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM queue_log WHERE appointment_id = $1 AND status = $2 LIMIT 1",
        )
        .bind(appointment_id.to_uuid())
        .bind(status.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(exists.is_some())
    }

    async fn list_by_appointment(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM queue_log \
             WHERE appointment_id = $1 ORDER BY created_at ASC"
        ))
        .bind(appointment_id.to_uuid())
        .fetch_all(self.pool())
        .await?;

        rows_to_entries(rows)
    }
}
