//! Shared data model for the medq clinic queue platform.
//!
//! Everything the engine, the store implementations, and the HTTP boundary
//! agree on lives here: strongly typed ids, the queue entry with its status
//! state machine, priority tiers, appointment read views, and the position
//! payloads pushed to waiting patients.

pub mod appointment;
pub mod error;
pub mod ids;
pub mod position;
pub mod queue;

pub use appointment::{Appointment, AppointmentStatus};
pub use error::ModelError;
pub use ids::{AppointmentID, ClinicID, DoctorID, PatientID, QueueID};
pub use position::{QueueEntryView, QueuePosition};
pub use queue::{Priority, QueueEntry, QueueStatus};
