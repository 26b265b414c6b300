use thiserror::Error;

/// Validation failures for values entering the model from the outside
/// (wire payloads, database rows).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid priority {0}. Must be 1 (Normal), 2 (Elderly), or 3 (Emergency)")]
    InvalidPriority(i16),

    #[error("Invalid status: {0}. Valid statuses are: IN_QUEUE, CALLED, DONE, MISSED")]
    InvalidStatus(String),

    #[error("Invalid appointment status: {0}")]
    InvalidAppointmentStatus(String),
}
