use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{AppointmentID, ClinicID, QueueID};

/// Lifecycle of a queue entry.
///
/// The transition table is the single source of truth for the state machine;
/// nothing else in the system is allowed to reason about status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Waiting to be served.
    InQueue,
    /// Currently being served by staff.
    Called,
    /// Service completed (terminal).
    Done,
    /// Patient did not respond when called or before being called.
    Missed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::InQueue => "IN_QUEUE",
            QueueStatus::Called => "CALLED",
            QueueStatus::Done => "DONE",
            QueueStatus::Missed => "MISSED",
        }
    }

    /// The queue state machine:
    ///
    /// - IN_QUEUE -> CALLED (staff calls patient)
    /// - IN_QUEUE -> MISSED (no-show before being called)
    /// - CALLED   -> DONE   (appointment completed)
    /// - CALLED   -> MISSED (no-show after being called)
    /// - MISSED   -> IN_QUEUE (requeue)
    ///
    /// DONE is terminal.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::InQueue, QueueStatus::Called)
                | (QueueStatus::InQueue, QueueStatus::Missed)
                | (QueueStatus::Called, QueueStatus::Done)
                | (QueueStatus::Called, QueueStatus::Missed)
                | (QueueStatus::Missed, QueueStatus::InQueue)
        )
    }

    /// True while the entry still occupies a place in the clinic flow.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::InQueue | QueueStatus::Called)
    }
}

impl FromStr for QueueStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_QUEUE" => Ok(QueueStatus::InQueue),
            "CALLED" => Ok(QueueStatus::Called),
            "DONE" => Ok(QueueStatus::Done),
            "MISSED" => Ok(QueueStatus::Missed),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority tiers. Higher serves first; ties break on check-in time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i16", into = "i16")]
pub enum Priority {
    Normal = 1,
    Elderly = 2,
    Emergency = 3,
}

impl Priority {
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }
}

impl TryFrom<i16> for Priority {
    type Error = ModelError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::Elderly),
            3 => Ok(Priority::Emergency),
            other => Err(ModelError::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for i16 {
    fn from(priority: Priority) -> Self {
        priority.as_i16()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Normal => "Normal",
            Priority::Elderly => "Elderly",
            Priority::Emergency => "Emergency",
        };
        f.write_str(name)
    }
}

/// A single row in a clinic's queue log.
///
/// Entries are never deleted; DONE and MISSED rows stay behind as the audit
/// trail that reporting reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: QueueID,
    pub clinic_id: ClinicID,
    pub appointment_id: AppointmentID,
    pub status: QueueStatus,
    pub priority: Priority,
    /// Check-in (or most recent requeue) timestamp; drives ordering.
    pub created_at: DateTime<Utc>,
    /// Set when the entry transitions to CALLED; wait-time reporting reads it.
    pub called_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Fresh IN_QUEUE entry for a check-in.
    pub fn new(clinic_id: ClinicID, appointment_id: AppointmentID, priority: Priority) -> Self {
        Self {
            queue_id: QueueID::new(),
            clinic_id,
            appointment_id,
            status: QueueStatus::InQueue,
            priority,
            created_at: Utc::now(),
            called_at: None,
        }
    }

    /// Canonical ordering among IN_QUEUE entries: priority descending,
    /// then check-in time ascending.
    pub fn queue_ordering(a: &QueueEntry, b: &QueueEntry) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_state_machine() {
        use QueueStatus::*;

        let allowed = [
            (InQueue, Called),
            (InQueue, Missed),
            (Called, Done),
            (Called, Missed),
            (Missed, InQueue),
        ];

        for from in [InQueue, Called, Done, Missed] {
            for to in [InQueue, Called, Done, Missed] {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn done_is_terminal() {
        for to in [
            QueueStatus::InQueue,
            QueueStatus::Called,
            QueueStatus::Done,
            QueueStatus::Missed,
        ] {
            assert!(!QueueStatus::Done.can_transition_to(to));
        }
    }

    #[test]
    fn priority_parses_only_defined_tiers() {
        assert_eq!(Priority::try_from(1).unwrap(), Priority::Normal);
        assert_eq!(Priority::try_from(2).unwrap(), Priority::Elderly);
        assert_eq!(Priority::try_from(3).unwrap(), Priority::Emergency);
        assert!(Priority::try_from(0).is_err());
        assert!(Priority::try_from(4).is_err());
        assert!(Priority::try_from(-1).is_err());
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            QueueStatus::InQueue,
            QueueStatus::Called,
            QueueStatus::Done,
            QueueStatus::Missed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("WAITING".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn ordering_prefers_priority_then_arrival() {
        let clinic = ClinicID::new();
        let mut early_normal =
            QueueEntry::new(clinic, AppointmentID::new(), Priority::Normal);
        let mut late_normal =
            QueueEntry::new(clinic, AppointmentID::new(), Priority::Normal);
        let mut emergency =
            QueueEntry::new(clinic, AppointmentID::new(), Priority::Emergency);

        early_normal.created_at = Utc::now() - chrono::Duration::minutes(10);
        late_normal.created_at = Utc::now() - chrono::Duration::minutes(5);
        emergency.created_at = Utc::now();

        let mut entries = vec![late_normal.clone(), emergency.clone(), early_normal.clone()];
        entries.sort_by(QueueEntry::queue_ordering);

        assert_eq!(entries[0].queue_id, emergency.queue_id);
        assert_eq!(entries[1].queue_id, early_normal.queue_id);
        assert_eq!(entries[2].queue_id, late_normal.queue_id);
    }
}
