//! Notification dispatch contract.
//!
//! The concrete transport (email provider, SMS gateway) lives outside this
//! crate; the engine only needs the three send operations. Delivery failures
//! are logged and swallowed by the caller: queue state is already committed
//! by the time a notification goes out.

use async_trait::async_trait;
use medq_model::{Appointment, AppointmentID};
use tracing::info;

use crate::error::Result;

/// Display context handed to the dispatcher for every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub to_email: String,
    pub patient_name: String,
    pub clinic_name: String,
    pub doctor_name: String,
    pub appointment_time: String,
    /// Queue position the message refers to (3 for "three away", the called
    /// position for "your turn").
    pub queue_number: u32,
    pub appointment_id: AppointmentID,
}

impl NotificationContext {
    /// Assemble the context from an appointment read view. `None` when the
    /// patient has no email on file; callers log and skip.
    pub fn from_appointment(appointment: &Appointment, queue_number: u32) -> Option<Self> {
        let to_email = appointment.patient_email.clone()?;
        Some(Self {
            to_email,
            patient_name: appointment.patient_name.clone(),
            clinic_name: appointment.clinic_name.clone(),
            doctor_name: appointment.doctor_name.clone(),
            appointment_time: appointment
                .scheduled_at
                .format("%d/%m/%Y %H:%M")
                .to_string(),
            queue_number,
            appointment_id: appointment.appointment_id,
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// "You are three positions away" heads-up.
    async fn send_three_away(&self, context: &NotificationContext) -> Result<()>;

    /// "It is your turn" call-in message.
    async fn send_your_turn(&self, context: &NotificationContext) -> Result<()>;

    /// Check-in confirmation.
    async fn send_confirmation(&self, context: &NotificationContext) -> Result<()>;
}

/// Dispatcher that records every message as a structured log line. Default
/// wiring until an email transport is configured.
#[derive(Debug, Default, Clone)]
pub struct TracingDispatcher;

#[async_trait]
impl NotificationDispatcher for TracingDispatcher {
    async fn send_three_away(&self, context: &NotificationContext) -> Result<()> {
        info!(
            to = %context.to_email,
            appointment = %context.appointment_id,
            clinic = %context.clinic_name,
            "notification: three away"
        );
        Ok(())
    }

    async fn send_your_turn(&self, context: &NotificationContext) -> Result<()> {
        info!(
            to = %context.to_email,
            appointment = %context.appointment_id,
            clinic = %context.clinic_name,
            position = context.queue_number,
            "notification: your turn"
        );
        Ok(())
    }

    async fn send_confirmation(&self, context: &NotificationContext) -> Result<()> {
        info!(
            to = %context.to_email,
            appointment = %context.appointment_id,
            clinic = %context.clinic_name,
            "notification: confirmation"
        );
        Ok(())
    }
}
