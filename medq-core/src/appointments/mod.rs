//! Appointment collaborator contract.
//!
//! Appointments are owned by the scheduling side of the system; the queue
//! engine only reads them and requests two status updates (MISSED on
//! no-show, SCHEDULED again on requeue).

pub mod postgres;

use async_trait::async_trait;
use medq_model::{Appointment, AppointmentID, AppointmentStatus};

pub use postgres::PostgresAppointmentDirectory;

use crate::error::Result;

#[async_trait]
pub trait AppointmentDirectory: Send + Sync {
    /// Look up an appointment with the display fields notifications need.
    async fn get(&self, appointment_id: AppointmentID) -> Result<Option<Appointment>>;

    /// Request a status change on the appointment record.
    async fn set_status(
        &self,
        appointment_id: AppointmentID,
        status: AppointmentStatus,
    ) -> Result<()>;
}

/// In-memory directory for tests and demo mode.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::*;
    use crate::error::QueueError;

    #[derive(Debug, Default)]
    pub struct InMemoryAppointmentDirectory {
        appointments: RwLock<HashMap<AppointmentID, Appointment>>,
    }

    impl InMemoryAppointmentDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, appointment: Appointment) {
            self.appointments
                .write()
                .expect("appointment directory lock poisoned")
                .insert(appointment.appointment_id, appointment);
        }
    }

    #[async_trait]
    impl AppointmentDirectory for InMemoryAppointmentDirectory {
        async fn get(&self, appointment_id: AppointmentID) -> Result<Option<Appointment>> {
            Ok(self
                .appointments
                .read()
                .map_err(|_| QueueError::Store("appointment directory lock poisoned".to_string()))?
                .get(&appointment_id)
                .cloned())
        }

        async fn set_status(
            &self,
            appointment_id: AppointmentID,
            status: AppointmentStatus,
        ) -> Result<()> {
            let mut appointments = self
                .appointments
                .write()
                .map_err(|_| QueueError::Store("appointment directory lock poisoned".to_string()))?;
            match appointments.get_mut(&appointment_id) {
                Some(appointment) => {
                    appointment.status = status;
                    Ok(())
                }
                None => Err(QueueError::AppointmentNotFound(appointment_id)),
            }
        }
    }
}

pub use memory::InMemoryAppointmentDirectory;
