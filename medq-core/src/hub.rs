//! Live position push.
//!
//! One open channel per tracked appointment; the hub subscribes to
//! clinic-changed notices and re-pushes the computed position on every
//! relevant change. Pushes ride their own task and never block, fail, or
//! roll back the engine mutation that triggered them; a dead client only
//! costs its own channel.

use std::sync::Arc;

use dashmap::DashMap;
use medq_model::{AppointmentID, ClinicID, QueuePosition};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::engine::QueueEngine;
use crate::error::QueueError;
use crate::events::QueueEvent;

/// Payload pushed over an open position channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PositionUpdate {
    Position(QueuePosition),
    NotInQueue(NotInQueueNotice),
}

/// Sent when the tracked appointment has no active queue entry. Before the
/// patient checks in this is informational; once they have left the queue it
/// is terminal and the channel closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotInQueueNotice {
    pub appointment_id: AppointmentID,
    pub error: String,
    #[serde(skip)]
    pub terminal: bool,
}

impl NotInQueueNotice {
    fn new(appointment_id: AppointmentID, terminal: bool) -> Self {
        Self {
            appointment_id,
            error: "Not in queue".to_string(),
            terminal,
        }
    }
}

struct TrackedChannel {
    sender: mpsc::UnboundedSender<PositionUpdate>,
    /// Clinic the appointment was last seen in; None until the first
    /// successful position computation.
    clinic_id: Option<ClinicID>,
}

/// Push-channel registry keyed by appointment.
pub struct LiveUpdateHub {
    engine: Arc<QueueEngine>,
    channels: DashMap<AppointmentID, TrackedChannel>,
}

impl std::fmt::Debug for LiveUpdateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateHub")
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

impl LiveUpdateHub {
    pub fn new(engine: Arc<QueueEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            channels: DashMap::new(),
        })
    }

    /// Open a push channel for an appointment, replacing (and thereby
    /// closing) any previous channel for the same id. The current position
    /// is pushed immediately; "not in queue yet" is a valid first signal,
    /// not an error.
    pub async fn open(
        &self,
        appointment_id: AppointmentID,
    ) -> mpsc::UnboundedReceiver<PositionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();

        let clinic_id = match self.engine.position_in_clinic(appointment_id).await {
            Ok((clinic_id, position)) => {
                let _ = tx.send(PositionUpdate::Position(position));
                Some(clinic_id)
            }
            Err(QueueError::NotInQueue(_)) => {
                // Will start updating once they check in.
                let _ = tx.send(PositionUpdate::NotInQueue(NotInQueueNotice::new(
                    appointment_id,
                    false,
                )));
                None
            }
            Err(err) => {
                error!(appointment_id = %appointment_id, %err, "failed to compute initial position");
                None
            }
        };

        // Dropping the previous sender ends the previous stream.
        self.channels
            .insert(appointment_id, TrackedChannel { sender: tx, clinic_id });
        debug!(appointment_id = %appointment_id, "position channel opened");

        rx
    }

    /// Explicitly close and unregister a channel.
    pub fn close(&self, appointment_id: AppointmentID) {
        if self.channels.remove(&appointment_id).is_some() {
            debug!(appointment_id = %appointment_id, "position channel closed");
        }
    }

    /// Number of open channels, for monitoring.
    pub fn active_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Start the broadcast loop: consume clinic-changed notices and re-push
    /// positions until the event bus closes.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut events = hub.engine.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(QueueEvent::QueueChanged { clinic_id }) => {
                        hub.handle_queue_changed(clinic_id).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Positions are recomputed from scratch on each
                        // event, so dropped notices only delay an update.
                        warn!(skipped, "live update hub lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_queue_changed(&self, clinic_id: ClinicID) {
        let tracked: Vec<(AppointmentID, Option<ClinicID>)> = self
            .channels
            .iter()
            .map(|entry| (*entry.key(), entry.value().clinic_id))
            .collect();

        for (appointment_id, known_clinic) in tracked {
            if known_clinic.is_some_and(|c| c != clinic_id) {
                continue;
            }

            match self.engine.position_in_clinic(appointment_id).await {
                Ok((clinic, position)) => {
                    let mut dead = false;
                    if let Some(mut channel) = self.channels.get_mut(&appointment_id) {
                        channel.clinic_id = Some(clinic);
                        dead = channel
                            .sender
                            .send(PositionUpdate::Position(position))
                            .is_err();
                    }
                    if dead {
                        self.channels.remove(&appointment_id);
                        debug!(appointment_id = %appointment_id, "removed disconnected channel");
                    }
                }
                Err(QueueError::NotInQueue(_)) => {
                    // Only a channel previously seen in this clinic has
                    // actually left its queue; an untracked clinic means the
                    // patient simply has not checked in yet.
                    if known_clinic == Some(clinic_id)
                        && let Some((_, channel)) = self.channels.remove(&appointment_id)
                    {
                        let _ = channel.sender.send(PositionUpdate::NotInQueue(
                            NotInQueueNotice::new(appointment_id, true),
                        ));
                        debug!(appointment_id = %appointment_id, "appointment left queue; channel closed");
                    }
                }
                Err(err) => {
                    error!(appointment_id = %appointment_id, %err, "failed to recompute position");
                }
            }
        }
    }
}
