use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{AppointmentID, ClinicID, DoctorID, PatientID};

/// Appointment lifecycle as tracked by the scheduling collaborator.
///
/// The queue engine only ever reads this and requests two updates: MISSED
/// when a patient no-shows, and SCHEDULED again when staff requeue them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Missed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "SCHEDULED",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Missed => "MISSED",
            AppointmentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(AppointmentStatus::Scheduled),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "MISSED" => Ok(AppointmentStatus::Missed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            other => Err(ModelError::InvalidAppointmentStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read view of an appointment, as supplied by the appointment collaborator.
///
/// Carries the display fields notifications need so the engine never has to
/// chase patient/doctor/clinic records itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: AppointmentID,
    pub clinic_id: ClinicID,
    pub patient_id: PatientID,
    pub doctor_id: DoctorID,
    pub scheduled_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub doctor_name: String,
    pub clinic_name: String,
}
