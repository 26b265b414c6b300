use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AppointmentID, ClinicID, QueueID};
use crate::queue::{Priority, QueueEntry, QueueStatus};

/// Minutes of estimated wait per patient ahead. Deliberately crude; can be
/// replaced with historical averages once reporting accumulates them.
const MINUTES_PER_PATIENT: u32 = 10;

/// Position payload returned by the position endpoint and pushed over the
/// live stream on every queue change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    pub appointment_id: AppointmentID,
    /// 1-indexed rank among IN_QUEUE entries; 0 means being served.
    pub position: u32,
    pub status: QueueStatus,
    pub priority: Priority,
    pub total_in_queue: u32,
    pub estimated_wait_time_minutes: u32,
    pub message: String,
    pub is_queued: bool,
}

impl QueuePosition {
    /// Payload for a waiting patient at `position` of `total_in_queue`.
    pub fn waiting(entry: &QueueEntry, position: u32, total_in_queue: u32) -> Self {
        Self {
            appointment_id: entry.appointment_id,
            position,
            status: entry.status,
            priority: entry.priority,
            total_in_queue,
            estimated_wait_time_minutes: estimate_wait_time(position),
            message: position_message(position),
            is_queued: true,
        }
    }

    /// Payload for a patient whose entry is CALLED: distinguished position 0,
    /// no wait.
    pub fn being_served(entry: &QueueEntry, total_in_queue: u32) -> Self {
        Self {
            appointment_id: entry.appointment_id,
            position: 0,
            status: entry.status,
            priority: entry.priority,
            total_in_queue,
            estimated_wait_time_minutes: 0,
            message: "You have been called - please proceed to reception".to_string(),
            is_queued: true,
        }
    }
}

/// A queue entry decorated with its computed rank, for clinic-facing lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntryView {
    pub queue_id: QueueID,
    pub clinic_id: ClinicID,
    pub appointment_id: AppointmentID,
    pub status: QueueStatus,
    pub priority: Priority,
    pub position: u32,
    pub total_in_queue: u32,
    pub estimated_wait_time_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
}

impl QueueEntryView {
    pub fn from_entry(entry: &QueueEntry, position: u32, total_in_queue: u32) -> Self {
        Self {
            queue_id: entry.queue_id,
            clinic_id: entry.clinic_id,
            appointment_id: entry.appointment_id,
            status: entry.status,
            priority: entry.priority,
            position,
            total_in_queue,
            estimated_wait_time_minutes: estimate_wait_time(position),
            created_at: entry.created_at,
            called_at: entry.called_at,
        }
    }
}

pub fn position_message(position: u32) -> String {
    match position {
        1 => "You are being served now".to_string(),
        2 => "You are next".to_string(),
        n => format!("{} patients ahead of you", n.saturating_sub(1)),
    }
}

pub fn estimate_wait_time(position: u32) -> u32 {
    position.saturating_sub(1) * MINUTES_PER_PATIENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_is_ten_minutes_per_patient_ahead() {
        assert_eq!(estimate_wait_time(1), 0);
        assert_eq!(estimate_wait_time(2), 10);
        assert_eq!(estimate_wait_time(5), 40);
    }

    #[test]
    fn messages_match_position() {
        assert_eq!(position_message(1), "You are being served now");
        assert_eq!(position_message(2), "You are next");
        assert_eq!(position_message(4), "3 patients ahead of you");
    }

    #[test]
    fn called_entry_maps_to_position_zero() {
        let mut entry = QueueEntry::new(
            ClinicID::new(),
            AppointmentID::new(),
            Priority::Normal,
        );
        entry.status = QueueStatus::Called;
        entry.called_at = Some(Utc::now());

        let position = QueuePosition::being_served(&entry, 7);
        assert_eq!(position.position, 0);
        assert_eq!(position.estimated_wait_time_minutes, 0);
        assert!(position.is_queued);
        assert_eq!(position.total_in_queue, 7);
    }
}
