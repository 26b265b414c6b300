use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medq_model::{
    Appointment, AppointmentID, AppointmentStatus, ClinicID, DoctorID, PatientID,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::appointments::AppointmentDirectory;
use crate::error::{QueueError, Result};

/// Postgres-backed appointment directory. Joins the scheduling tables once
/// per lookup so callers get the full notification display context.
#[derive(Debug, Clone)]
pub struct PostgresAppointmentDirectory {
    pool: PgPool,
}

impl PostgresAppointmentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    appointment_id: Uuid,
    clinic_id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    scheduled_at: DateTime<Utc>,
    status: String,
    patient_name: String,
    patient_email: Option<String>,
    doctor_name: String,
    clinic_name: String,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = QueueError;

    fn try_from(row: AppointmentRow) -> Result<Appointment> {
        let status: AppointmentStatus = row.status.parse().map_err(|_| {
            QueueError::Store(format!("corrupt appointment status in row: {}", row.status))
        })?;
        Ok(Appointment {
            appointment_id: AppointmentID(row.appointment_id),
            clinic_id: ClinicID(row.clinic_id),
            patient_id: PatientID(row.patient_id),
            doctor_id: DoctorID(row.doctor_id),
            scheduled_at: row.scheduled_at,
            status,
            patient_name: row.patient_name,
            patient_email: row.patient_email,
            doctor_name: row.doctor_name,
            clinic_name: row.clinic_name,
        })
    }
}

#[async_trait]
impl AppointmentDirectory for PostgresAppointmentDirectory {
    async fn get(&self, appointment_id: AppointmentID) -> Result<Option<Appointment>> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT
                a.appointment_id,
                a.clinic_id,
                a.patient_id,
                a.doctor_id,
                a.scheduled_at,
                a.status,
                trim(concat(p.first_name, ' ', p.last_name)) AS patient_name,
                p.email AS patient_email,
                trim(concat(d.first_name, ' ', d.last_name)) AS doctor_name,
                c.name AS clinic_name
            FROM appointments a
            JOIN patients p ON p.patient_id = a.patient_id
            JOIN doctors d ON d.doctor_id = a.doctor_id
            JOIN clinics c ON c.clinic_id = a.clinic_id
            WHERE a.appointment_id = $1
            "#,
        )
        .bind(appointment_id.to_uuid())
        .fetch_optional(self.pool())
        .await?;

        row.map(Appointment::try_from).transpose()
    }

    async fn set_status(
        &self,
        appointment_id: AppointmentID,
        status: AppointmentStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE appointments SET status = $2 WHERE appointment_id = $1")
            .bind(appointment_id.to_uuid())
            .bind(status.as_str())
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::AppointmentNotFound(appointment_id));
        }
        Ok(())
    }
}
