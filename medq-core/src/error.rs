use medq_model::{AppointmentID, ClinicID, ModelError, QueueID, QueueStatus};
use thiserror::Error;

/// Typed failures for every queue operation. The HTTP boundary maps these
/// onto user-facing status codes via [`QueueError::kind`].
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] ModelError),

    #[error("Invalid status transition from {from} to {to}. Valid transitions: IN_QUEUE->CALLED/MISSED, CALLED->DONE/MISSED, MISSED->IN_QUEUE")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("Appointment not found with ID: {0}")]
    AppointmentNotFound(AppointmentID),

    #[error("Queue entry not found with ID: {0}")]
    EntryNotFound(QueueID),

    #[error("Patient already has an active queue entry for this appointment")]
    DuplicateActiveEntry(AppointmentID),

    #[error("No active queue entry found for appointment ID: {0}")]
    NotInQueue(AppointmentID),

    #[error("No patients waiting in queue for clinic: {0}")]
    QueueEmpty(ClinicID),

    #[error("No MISSED queue entry found for appointment ID: {0}")]
    NoMissedEntry(AppointmentID),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),
}

/// Coarse classification used when mapping to transport responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Dependency,
    Internal,
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Validation(_) => ErrorKind::Validation,
            QueueError::AppointmentNotFound(_)
            | QueueError::EntryNotFound(_)
            | QueueError::NotInQueue(_) => ErrorKind::NotFound,
            QueueError::InvalidTransition { .. }
            | QueueError::DuplicateActiveEntry(_)
            | QueueError::QueueEmpty(_)
            | QueueError::NoMissedEntry(_) => ErrorKind::Conflict,
            QueueError::Notification(_) => ErrorKind::Dependency,
            QueueError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
