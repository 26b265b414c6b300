//! The queue engine: sole mutator of queue entries.
//!
//! Every mutating operation is serialized per clinic through a lock table so
//! compound read-then-write sequences (duplicate check + insert, complete +
//! call, find + requeue) appear atomic to readers. Pure reads run against
//! committed store state without taking the clinic lock.
//!
//! Side effects (event publish, notifications) happen strictly after the
//! store mutation is committed; their failure never unwinds queue state.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use medq_model::{
    Appointment, AppointmentID, AppointmentStatus, ClinicID, Priority, QueueEntry,
    QueueEntryView, QueueID, QueuePosition, QueueStatus,
};
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};

use crate::appointments::AppointmentDirectory;
use crate::error::{QueueError, Result};
use crate::events::{QueueEvent, QueueEventBus};
use crate::notify::{NotificationContext, NotificationDispatcher};
use crate::store::QueueStore;

/// Queue position that triggers the automatic "three away" heads-up.
const THREE_AWAY_POSITION: usize = 3;

pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    appointments: Arc<dyn AppointmentDirectory>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    bus: QueueEventBus,
    /// Per-clinic mutual exclusion for compound mutations.
    clinic_locks: DashMap<ClinicID, Arc<Mutex<()>>>,
    /// Last entry notified at position three, per clinic. Keeps the
    /// threshold notification to one per crossing instead of one per
    /// mutation.
    three_away_ledger: DashMap<ClinicID, QueueID>,
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("clinic_locks", &self.clinic_locks.len())
            .field("event_receivers", &self.bus.receiver_count())
            .finish()
    }
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        appointments: Arc<dyn AppointmentDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        bus: QueueEventBus,
    ) -> Self {
        Self {
            store,
            appointments,
            dispatcher,
            bus,
            clinic_locks: DashMap::new(),
            three_away_ledger: DashMap::new(),
        }
    }

    /// Subscribe to clinic-changed notices.
    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    fn clinic_lock(&self, clinic_id: ClinicID) -> Arc<Mutex<()>> {
        self.clinic_locks
            .entry(clinic_id)
            .or_default()
            .value()
            .clone()
    }

    // ---- mutations -------------------------------------------------------

    /// Check a patient in: create a fresh IN_QUEUE entry for the
    /// appointment.
    pub async fn check_in(
        &self,
        appointment_id: AppointmentID,
        priority: i16,
    ) -> Result<QueueEntry> {
        let priority = Priority::try_from(priority)?;

        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(QueueError::AppointmentNotFound(appointment_id))?;
        let clinic_id = appointment.clinic_id;

        let lock = self.clinic_lock(clinic_id);
        let entry = {
            let _guard = lock.lock().await;

            // An appointment is active in queue at most once, whether
            // waiting or already called.
            if self.has_active_entry(appointment_id).await? {
                return Err(QueueError::DuplicateActiveEntry(appointment_id));
            }

            self.store
                .insert(QueueEntry::new(clinic_id, appointment_id, priority))
                .await?
        };

        info!(
            queue_id = %entry.queue_id,
            appointment_id = %appointment_id,
            clinic_id = %clinic_id,
            %priority,
            "patient checked in"
        );

        self.bus.publish(QueueEvent::QueueChanged { clinic_id });
        if let Some(context) = self.notification_context(&appointment, &entry, 0).await {
            if let Err(err) = self.dispatcher.send_confirmation(&context).await {
                error!(queue_id = %entry.queue_id, %err, "failed to send check-in confirmation");
            }
        }
        self.evaluate_three_away(clinic_id).await;

        Ok(entry)
    }

    /// Call the next waiting patient. Atomically completes whoever is
    /// currently being served, then transitions the head of the queue to
    /// CALLED. Fails without touching anything when nobody is waiting.
    pub async fn call_next(&self, clinic_id: ClinicID) -> Result<QueueEntry> {
        let lock = self.clinic_lock(clinic_id);
        let called = {
            let _guard = lock.lock().await;

            let waiting = self
                .store
                .list_by_clinic_and_status_ordered(clinic_id, QueueStatus::InQueue)
                .await?;
            let Some(next) = waiting.first().cloned() else {
                return Err(QueueError::QueueEmpty(clinic_id));
            };

            // Close out the patient currently at the desk.
            if let Some(mut current) = self
                .store
                .list_by_clinic_and_status(clinic_id, QueueStatus::Called)
                .await?
                .into_iter()
                .next()
            {
                current.status = QueueStatus::Done;
                self.store.update(&current).await?;
                info!(queue_id = %current.queue_id, "marked currently serving patient as DONE");
            }

            let mut next = next;
            next.status = QueueStatus::Called;
            next.called_at = Some(Utc::now());
            self.store.update(&next).await?
        };

        info!(
            queue_id = %called.queue_id,
            appointment_id = %called.appointment_id,
            clinic_id = %clinic_id,
            "called next patient"
        );

        self.send_your_turn(&called, 1).await;
        self.bus.publish(QueueEvent::QueueChanged { clinic_id });
        self.evaluate_three_away(clinic_id).await;

        Ok(called)
    }

    /// Call a specific waiting patient out of order. Unlike [`call_next`]
    /// this leaves any currently CALLED entry untouched: staff pulling
    /// someone forward must not silently close out the patient at the desk.
    ///
    /// [`call_next`]: QueueEngine::call_next
    pub async fn call_by_appointment(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<QueueEntry> {
        let entry = self
            .store
            .find_by_appointment_and_status(appointment_id, QueueStatus::InQueue)
            .await?
            .ok_or(QueueError::NotInQueue(appointment_id))?;

        let lock = self.clinic_lock(entry.clinic_id);
        let (called, position) = {
            let _guard = lock.lock().await;

            // Re-read under the lock; another staff action may have raced us.
            let mut entry = self
                .store
                .find_by_appointment_and_status(appointment_id, QueueStatus::InQueue)
                .await?
                .ok_or(QueueError::NotInQueue(appointment_id))?;

            let queue = self
                .store
                .list_by_clinic_and_status_ordered(entry.clinic_id, QueueStatus::InQueue)
                .await?;
            let position = rank_of(&queue, &entry);

            entry.status = QueueStatus::Called;
            entry.called_at = Some(Utc::now());
            (self.store.update(&entry).await?, position)
        };

        info!(
            queue_id = %called.queue_id,
            appointment_id = %appointment_id,
            was_position = position,
            "called patient by appointment"
        );

        self.send_your_turn(&called, position).await;
        self.bus
            .publish(QueueEvent::QueueChanged { clinic_id: called.clinic_id });
        self.evaluate_three_away(called.clinic_id).await;

        Ok(called)
    }

    /// Apply a status transition to a queue entry, validated against the
    /// central state machine. A transition to MISSED additionally asks the
    /// appointment collaborator to mark the appointment missed.
    pub async fn update_status(
        &self,
        queue_id: QueueID,
        new_status: QueueStatus,
    ) -> Result<QueueEntry> {
        let current = self
            .store
            .get(queue_id)
            .await?
            .ok_or(QueueError::EntryNotFound(queue_id))?;

        let lock = self.clinic_lock(current.clinic_id);
        let saved = {
            let _guard = lock.lock().await;

            let mut entry = self
                .store
                .get(queue_id)
                .await?
                .ok_or(QueueError::EntryNotFound(queue_id))?;

            if !entry.status.can_transition_to(new_status) {
                return Err(QueueError::InvalidTransition {
                    from: entry.status,
                    to: new_status,
                });
            }

            entry.status = new_status;
            if new_status == QueueStatus::Called {
                entry.called_at = Some(Utc::now());
            }
            self.store.update(&entry).await?
        };

        info!(queue_id = %queue_id, status = %new_status, "queue status changed");

        if new_status == QueueStatus::Missed {
            match self
                .appointments
                .set_status(saved.appointment_id, AppointmentStatus::Missed)
                .await
            {
                Ok(()) => {
                    info!(appointment_id = %saved.appointment_id, "appointment marked MISSED")
                }
                Err(err) => warn!(
                    appointment_id = %saved.appointment_id,
                    %err,
                    "could not mark appointment MISSED"
                ),
            }
        }

        self.bus
            .publish(QueueEvent::QueueChanged { clinic_id: saved.clinic_id });
        self.evaluate_three_away(saved.clinic_id).await;

        Ok(saved)
    }

    /// Bring a missed patient back into the queue. Mutates the most recent
    /// MISSED row in place — same `queue_id`, new priority, refreshed
    /// check-in time — so the audit trail stays one row per visit attempt.
    pub async fn requeue_missed(
        &self,
        appointment_id: AppointmentID,
        new_priority: i16,
    ) -> Result<QueueEntry> {
        let priority = Priority::try_from(new_priority)?;

        let appointment = self
            .appointments
            .get(appointment_id)
            .await?
            .ok_or(QueueError::AppointmentNotFound(appointment_id))?;
        let clinic_id = appointment.clinic_id;

        let lock = self.clinic_lock(clinic_id);
        let saved = {
            let _guard = lock.lock().await;

            let history = self.store.list_by_appointment(appointment_id).await?;
            let missed = history
                .into_iter()
                .filter(|e| e.status == QueueStatus::Missed)
                .max_by_key(|e| e.created_at)
                .ok_or(QueueError::NoMissedEntry(appointment_id))?;

            if !missed.status.can_transition_to(QueueStatus::InQueue) {
                return Err(QueueError::InvalidTransition {
                    from: missed.status,
                    to: QueueStatus::InQueue,
                });
            }

            let mut entry = missed;
            entry.status = QueueStatus::InQueue;
            entry.priority = priority;
            entry.created_at = Utc::now();
            entry.called_at = None;
            self.store.update(&entry).await?
        };

        // Committed queue state is authoritative; the appointment reset is
        // best effort, same as the MISSED path in update_status.
        if let Err(err) = self
            .appointments
            .set_status(appointment_id, AppointmentStatus::Scheduled)
            .await
        {
            warn!(
                appointment_id = %appointment_id,
                %err,
                "could not reset appointment to SCHEDULED after requeue"
            );
        }

        info!(
            queue_id = %saved.queue_id,
            appointment_id = %appointment_id,
            %priority,
            "missed patient requeued"
        );

        self.bus.publish(QueueEvent::QueueChanged { clinic_id });
        self.evaluate_three_away(clinic_id).await;

        Ok(saved)
    }

    /// Completion hook for appointments closed outside the queue flow.
    /// Completes a CALLED entry; an entry still waiting is left alone (staff
    /// should call the patient first). Returns `None` when the appointment
    /// has no entry to complete.
    pub async fn mark_appointment_done(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<Option<QueueEntry>> {
        let Some(entry) = self
            .store
            .find_by_appointment_and_status(appointment_id, QueueStatus::Called)
            .await?
        else {
            if self
                .store
                .exists_by_appointment_and_status(appointment_id, QueueStatus::InQueue)
                .await?
            {
                warn!(
                    appointment_id = %appointment_id,
                    "appointment closed while still waiting in queue; entry left IN_QUEUE"
                );
            }
            return Ok(None);
        };

        let lock = self.clinic_lock(entry.clinic_id);
        let saved = {
            let _guard = lock.lock().await;

            let mut entry = self
                .store
                .get(entry.queue_id)
                .await?
                .ok_or(QueueError::EntryNotFound(entry.queue_id))?;
            if entry.status != QueueStatus::Called {
                return Ok(None);
            }
            entry.status = QueueStatus::Done;
            self.store.update(&entry).await?
        };

        info!(
            queue_id = %saved.queue_id,
            appointment_id = %appointment_id,
            "queue entry completed with appointment"
        );
        self.bus
            .publish(QueueEvent::QueueChanged { clinic_id: saved.clinic_id });

        Ok(Some(saved))
    }

    // ---- reads -----------------------------------------------------------

    /// IN_QUEUE entries for a clinic in canonical order (priority
    /// descending, check-in time ascending). Defines the ordering every
    /// other computation uses.
    pub async fn active_queue(&self, clinic_id: ClinicID) -> Result<Vec<QueueEntry>> {
        self.store
            .list_by_clinic_and_status_ordered(clinic_id, QueueStatus::InQueue)
            .await
    }

    /// The active queue decorated with 1-indexed positions and wait
    /// estimates, for staff-facing listings.
    pub async fn queue_with_details(
        &self,
        clinic_id: ClinicID,
    ) -> Result<Vec<QueueEntryView>> {
        let queue = self.active_queue(clinic_id).await?;
        let total = queue.len() as u32;
        Ok(queue
            .iter()
            .enumerate()
            .map(|(i, entry)| QueueEntryView::from_entry(entry, i as u32 + 1, total))
            .collect())
    }

    /// Current position payload for an appointment. IN_QUEUE entries get
    /// their 1-indexed rank; a CALLED entry reports the distinguished
    /// "being served" position 0.
    pub async fn position(&self, appointment_id: AppointmentID) -> Result<QueuePosition> {
        self.position_in_clinic(appointment_id)
            .await
            .map(|(_, position)| position)
    }

    /// [`position`] plus the owning clinic, for observers that scope
    /// updates per clinic.
    ///
    /// [`position`]: QueueEngine::position
    pub async fn position_in_clinic(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<(ClinicID, QueuePosition)> {
        let entry = match self
            .store
            .find_by_appointment_and_status(appointment_id, QueueStatus::InQueue)
            .await?
        {
            Some(entry) => entry,
            None => self
                .store
                .find_by_appointment_and_status(appointment_id, QueueStatus::Called)
                .await?
                .ok_or(QueueError::NotInQueue(appointment_id))?,
        };

        let queue = self
            .store
            .list_by_clinic_and_status_ordered(entry.clinic_id, QueueStatus::InQueue)
            .await?;
        let total = queue.len() as u32;

        let position = if entry.status == QueueStatus::Called {
            QueuePosition::being_served(&entry, total)
        } else {
            QueuePosition::waiting(&entry, rank_of(&queue, &entry), total)
        };

        Ok((entry.clinic_id, position))
    }

    /// The CALLED entry for a clinic, if anyone is at the desk.
    pub async fn currently_serving(&self, clinic_id: ClinicID) -> Result<Option<QueueEntry>> {
        Ok(self
            .store
            .list_by_clinic_and_status(clinic_id, QueueStatus::Called)
            .await?
            .into_iter()
            .next())
    }

    /// Latest MISSED entry per appointment for a clinic, excluding
    /// appointments already completed or already back in the queue.
    pub async fn missed_entries(&self, clinic_id: ClinicID) -> Result<Vec<QueueEntry>> {
        let missed = self
            .store
            .list_by_clinic_and_status(clinic_id, QueueStatus::Missed)
            .await?;

        let mut latest: HashMap<AppointmentID, QueueEntry> = HashMap::new();
        for entry in missed {
            match latest.get(&entry.appointment_id) {
                Some(existing) if existing.created_at >= entry.created_at => {}
                _ => {
                    latest.insert(entry.appointment_id, entry);
                }
            }
        }

        let mut entries = Vec::with_capacity(latest.len());
        for entry in latest.into_values() {
            let resolved = self
                .store
                .exists_by_appointment_and_status(entry.appointment_id, QueueStatus::Done)
                .await?;
            let requeued = self
                .store
                .exists_by_appointment_and_status(entry.appointment_id, QueueStatus::InQueue)
                .await?;
            if !resolved && !requeued {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(entries)
    }

    /// Full queue history for an appointment, oldest first.
    pub async fn queue_history(
        &self,
        appointment_id: AppointmentID,
    ) -> Result<Vec<QueueEntry>> {
        self.store.list_by_appointment(appointment_id).await
    }

    /// Whether the appointment currently has an IN_QUEUE entry.
    pub async fn is_in_queue(&self, appointment_id: AppointmentID) -> Result<bool> {
        self.store
            .exists_by_appointment_and_status(appointment_id, QueueStatus::InQueue)
            .await
    }

    /// Number of IN_QUEUE entries for a clinic.
    pub async fn queue_count(&self, clinic_id: ClinicID) -> Result<u32> {
        Ok(self.active_queue(clinic_id).await?.len() as u32)
    }

    // ---- side effects ----------------------------------------------------

    async fn has_active_entry(&self, appointment_id: AppointmentID) -> Result<bool> {
        for status in [QueueStatus::InQueue, QueueStatus::Called] {
            if self
                .store
                .exists_by_appointment_and_status(appointment_id, status)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-evaluate the position-three threshold after a mutation. Sends at
    /// most one "three away" message per entry per crossing: the ledger
    /// remembers who was last notified for each clinic.
    async fn evaluate_three_away(&self, clinic_id: ClinicID) {
        let queue = match self
            .store
            .list_by_clinic_and_status_ordered(clinic_id, QueueStatus::InQueue)
            .await
        {
            Ok(queue) => queue,
            Err(err) => {
                error!(clinic_id = %clinic_id, %err, "failed to re-read queue for threshold check");
                return;
            }
        };

        let Some(third) = queue.get(THREE_AWAY_POSITION - 1) else {
            // Nobody at position three; the next arrival there is a fresh
            // crossing.
            self.three_away_ledger.remove(&clinic_id);
            return;
        };

        let already_notified = self
            .three_away_ledger
            .get(&clinic_id)
            .map(|id| *id.value() == third.queue_id)
            .unwrap_or(false);
        if already_notified {
            return;
        }
        self.three_away_ledger.insert(clinic_id, third.queue_id);

        let Some(context) = self
            .load_context(third, THREE_AWAY_POSITION as u32)
            .await
        else {
            return;
        };
        if let Err(err) = self.dispatcher.send_three_away(&context).await {
            error!(queue_id = %third.queue_id, %err, "failed to send 'three away' notification");
        } else {
            info!(
                queue_id = %third.queue_id,
                appointment_id = %third.appointment_id,
                "sent 'three away' notification"
            );
        }
    }

    async fn send_your_turn(&self, entry: &QueueEntry, position: u32) {
        let Some(context) = self.load_context(entry, position).await else {
            return;
        };
        if let Err(err) = self.dispatcher.send_your_turn(&context).await {
            error!(queue_id = %entry.queue_id, %err, "failed to send 'your turn' notification");
        } else {
            info!(
                queue_id = %entry.queue_id,
                appointment_id = %entry.appointment_id,
                "sent 'your turn' notification"
            );
        }
    }

    async fn load_context(
        &self,
        entry: &QueueEntry,
        queue_number: u32,
    ) -> Option<NotificationContext> {
        let appointment = match self.appointments.get(entry.appointment_id).await {
            Ok(Some(appointment)) => appointment,
            Ok(None) => {
                warn!(
                    queue_id = %entry.queue_id,
                    "skipping notification: appointment not found"
                );
                return None;
            }
            Err(err) => {
                error!(queue_id = %entry.queue_id, %err, "failed to load appointment for notification");
                return None;
            }
        };
        self.notification_context(&appointment, entry, queue_number)
            .await
    }

    async fn notification_context(
        &self,
        appointment: &Appointment,
        entry: &QueueEntry,
        queue_number: u32,
    ) -> Option<NotificationContext> {
        let context = NotificationContext::from_appointment(appointment, queue_number);
        if context.is_none() {
            warn!(
                queue_id = %entry.queue_id,
                "skipping notification: no patient email on file"
            );
        }
        context
    }
}

/// 1 + number of entries ranked strictly ahead in the canonical order.
fn rank_of(queue: &[QueueEntry], entry: &QueueEntry) -> u32 {
    let ahead = queue
        .iter()
        .filter(|other| {
            other.queue_id != entry.queue_id
                && QueueEntry::queue_ordering(other, entry) == Ordering::Less
        })
        .count();
    ahead as u32 + 1
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::appointments::InMemoryAppointmentDirectory;
    use crate::notify::MockNotificationDispatcher;
    use crate::store::InMemoryQueueStore;
    use medq_model::{DoctorID, PatientID};

    struct Harness {
        engine: Arc<QueueEngine>,
        directory: Arc<InMemoryAppointmentDirectory>,
    }

    fn harness_with(dispatcher: MockNotificationDispatcher) -> Harness {
        let store = Arc::new(InMemoryQueueStore::new());
        let directory = Arc::new(InMemoryAppointmentDirectory::new());
        let engine = Arc::new(QueueEngine::new(
            store,
            directory.clone(),
            Arc::new(dispatcher),
            QueueEventBus::new(64),
        ));
        Harness { engine, directory }
    }

    fn harness() -> Harness {
        harness_with(permissive_dispatcher())
    }

    /// Dispatcher that accepts any message; for tests that assert on queue
    /// state rather than notifications.
    fn permissive_dispatcher() -> MockNotificationDispatcher {
        let mut mock = MockNotificationDispatcher::new();
        mock.expect_send_three_away().returning(|_| Ok(()));
        mock.expect_send_your_turn().returning(|_| Ok(()));
        mock.expect_send_confirmation().returning(|_| Ok(()));
        mock
    }

    fn appointment_for(clinic_id: ClinicID) -> Appointment {
        Appointment {
            appointment_id: AppointmentID::new(),
            clinic_id,
            patient_id: PatientID::new(),
            doctor_id: DoctorID::new(),
            scheduled_at: Utc::now(),
            status: AppointmentStatus::Scheduled,
            patient_name: "Ada Lovelace".to_string(),
            patient_email: Some("ada@example.com".to_string()),
            doctor_name: "Grace Hopper".to_string(),
            clinic_name: "North Clinic".to_string(),
        }
    }

    async fn seed_appointment(h: &Harness, clinic_id: ClinicID) -> AppointmentID {
        let appointment = appointment_for(clinic_id);
        let id = appointment.appointment_id;
        h.directory.put(appointment);
        id
    }

    async fn check_in(h: &Harness, clinic_id: ClinicID, priority: i16) -> QueueEntry {
        let id = seed_appointment(h, clinic_id).await;
        // Distinct created_at for deterministic tie-breaks.
        tokio::time::sleep(Duration::from_millis(2)).await;
        h.engine.check_in(id, priority).await.unwrap()
    }

    #[tokio::test]
    async fn check_in_rejects_invalid_priority() {
        let h = harness();
        let clinic = ClinicID::new();
        let id = seed_appointment(&h, clinic).await;

        for bad in [0, 4, -1] {
            let err = h.engine.check_in(id, bad).await.unwrap_err();
            assert!(matches!(err, QueueError::Validation(_)), "priority {bad}");
        }
    }

    #[tokio::test]
    async fn check_in_rejects_unknown_appointment() {
        let h = harness();
        let err = h.engine.check_in(AppointmentID::new(), 1).await.unwrap_err();
        assert!(matches!(err, QueueError::AppointmentNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_check_in_conflicts_and_leaves_one_entry() {
        let h = harness();
        let clinic = ClinicID::new();
        let id = seed_appointment(&h, clinic).await;

        h.engine.check_in(id, 1).await.unwrap();
        let err = h.engine.check_in(id, 1).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateActiveEntry(_)));

        let queue = h.engine.active_queue(clinic).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn check_in_conflicts_while_called() {
        let h = harness();
        let clinic = ClinicID::new();
        let id = seed_appointment(&h, clinic).await;

        h.engine.check_in(id, 1).await.unwrap();
        h.engine.call_next(clinic).await.unwrap();

        // The entry is CALLED now; the appointment is still active in queue.
        let err = h.engine.check_in(id, 1).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateActiveEntry(_)));
    }

    #[tokio::test]
    async fn scenario_a_emergency_jumps_ahead() {
        let h = harness();
        let clinic = ClinicID::new();

        let p1 = check_in(&h, clinic, 1).await;
        let p2 = check_in(&h, clinic, 1).await;
        let p3 = check_in(&h, clinic, 3).await;

        let order: Vec<QueueID> = h
            .engine
            .active_queue(clinic)
            .await
            .unwrap()
            .iter()
            .map(|e| e.queue_id)
            .collect();
        assert_eq!(order, vec![p3.queue_id, p1.queue_id, p2.queue_id]);

        let position = h.engine.position(p3.appointment_id).await.unwrap();
        assert_eq!(position.position, 1);
        assert_eq!(position.total_in_queue, 3);
        assert_eq!(position.message, "You are being served now");
    }

    #[tokio::test]
    async fn scenario_b_same_priority_is_fifo() {
        let h = harness();
        let clinic = ClinicID::new();

        let _a = check_in(&h, clinic, 1).await;
        let b = check_in(&h, clinic, 1).await;

        let position = h.engine.position(b.appointment_id).await.unwrap();
        assert_eq!(position.position, 2);
        assert_eq!(position.message, "You are next");
        assert_eq!(position.estimated_wait_time_minutes, 10);
    }

    #[tokio::test]
    async fn scenario_c_call_next_on_empty_queue_touches_nothing() {
        let h = harness();
        let clinic = ClinicID::new();

        // Put someone at the desk so there is state that could be damaged.
        let served = check_in(&h, clinic, 1).await;
        h.engine.call_next(clinic).await.unwrap();

        let err = h.engine.call_next(clinic).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueEmpty(_)));

        // The CALLED entry must not have been completed by the failed call.
        let serving = h.engine.currently_serving(clinic).await.unwrap().unwrap();
        assert_eq!(serving.queue_id, served.queue_id);
        assert_eq!(serving.status, QueueStatus::Called);
    }

    #[tokio::test]
    async fn call_next_completes_previous_and_calls_head() {
        let h = harness();
        let clinic = ClinicID::new();

        let first = check_in(&h, clinic, 1).await;
        let second = check_in(&h, clinic, 1).await;

        let called = h.engine.call_next(clinic).await.unwrap();
        assert_eq!(called.queue_id, first.queue_id);
        assert_eq!(called.status, QueueStatus::Called);
        assert!(called.called_at.is_some());

        let called = h.engine.call_next(clinic).await.unwrap();
        assert_eq!(called.queue_id, second.queue_id);

        // Exactly one CALLED entry; the first is DONE.
        let serving = h.engine.currently_serving(clinic).await.unwrap().unwrap();
        assert_eq!(serving.queue_id, second.queue_id);
        let history = h.engine.queue_history(first.appointment_id).await.unwrap();
        assert_eq!(history[0].status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn call_by_appointment_leaves_current_called_untouched() {
        let h = harness();
        let clinic = ClinicID::new();

        let first = check_in(&h, clinic, 1).await;
        let second = check_in(&h, clinic, 1).await;
        h.engine.call_next(clinic).await.unwrap();

        let called = h
            .engine
            .call_by_appointment(second.appointment_id)
            .await
            .unwrap();
        assert_eq!(called.status, QueueStatus::Called);

        // Both entries are CALLED: the out-of-order call does not complete
        // the patient already at the desk.
        let first_now = h.engine.queue_history(first.appointment_id).await.unwrap();
        assert_eq!(first_now[0].status, QueueStatus::Called);
    }

    #[tokio::test]
    async fn call_by_appointment_requires_waiting_entry() {
        let h = harness();
        let err = h
            .engine
            .call_by_appointment(AppointmentID::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotInQueue(_)));
    }

    #[tokio::test]
    async fn position_of_called_entry_is_zero() {
        let h = harness();
        let clinic = ClinicID::new();

        let entry = check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await;
        h.engine.call_next(clinic).await.unwrap();

        let position = h.engine.position(entry.appointment_id).await.unwrap();
        assert_eq!(position.position, 0);
        assert_eq!(position.status, QueueStatus::Called);
        assert_eq!(position.estimated_wait_time_minutes, 0);
        assert_eq!(
            position.message,
            "You have been called - please proceed to reception"
        );
        assert!(position.is_queued);
    }

    #[tokio::test]
    async fn position_for_unknown_appointment_fails() {
        let h = harness();
        let err = h.engine.position(AppointmentID::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotInQueue(_)));
    }

    #[tokio::test]
    async fn update_status_rejects_invalid_transitions() {
        let h = harness();
        let clinic = ClinicID::new();
        let entry = check_in(&h, clinic, 1).await;

        // IN_QUEUE -> DONE skips the CALLED step.
        let err = h
            .engine
            .update_status(entry.queue_id, QueueStatus::Done)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        // DONE is terminal.
        h.engine
            .update_status(entry.queue_id, QueueStatus::Called)
            .await
            .unwrap();
        h.engine
            .update_status(entry.queue_id, QueueStatus::Done)
            .await
            .unwrap();
        let err = h
            .engine
            .update_status(entry.queue_id, QueueStatus::Missed)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn update_status_to_missed_marks_appointment_missed() {
        let h = harness();
        let clinic = ClinicID::new();
        let entry = check_in(&h, clinic, 1).await;

        h.engine
            .update_status(entry.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        let appointment = h
            .directory
            .get(entry.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Missed);
    }

    #[tokio::test]
    async fn scenario_d_requeue_mutates_row_in_place() {
        let h = harness();
        let clinic = ClinicID::new();

        let entry = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(entry.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        // Two more patients arrive while ours is missed.
        check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await;

        tokio::time::sleep(Duration::from_millis(2)).await;
        let requeued = h
            .engine
            .requeue_missed(entry.appointment_id, 2)
            .await
            .unwrap();

        // Same row, new tier, refreshed check-in time.
        assert_eq!(requeued.queue_id, entry.queue_id);
        assert_eq!(requeued.status, QueueStatus::InQueue);
        assert_eq!(requeued.priority, Priority::Elderly);
        assert!(requeued.created_at > entry.created_at);
        assert!(requeued.called_at.is_none());

        let history = h.engine.queue_history(entry.appointment_id).await.unwrap();
        assert_eq!(history.len(), 1);

        // Elderly outranks the two waiting Normals.
        let position = h.engine.position(entry.appointment_id).await.unwrap();
        assert_eq!(position.position, 1);

        // And the appointment is back on the schedule.
        let appointment = h
            .directory
            .get(entry.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    }

    #[tokio::test]
    async fn requeue_elderly_goes_behind_earlier_same_tier() {
        let h = harness();
        let clinic = ClinicID::new();

        let missed = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(missed.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        let waiting_elderly = check_in(&h, clinic, 2).await;

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.engine
            .requeue_missed(missed.appointment_id, 2)
            .await
            .unwrap();

        // Re-entry lands at the back of its new tier.
        let order: Vec<QueueID> = h
            .engine
            .active_queue(clinic)
            .await
            .unwrap()
            .iter()
            .map(|e| e.queue_id)
            .collect();
        assert_eq!(order, vec![waiting_elderly.queue_id, missed.queue_id]);
    }

    #[tokio::test]
    async fn requeue_without_missed_entry_conflicts() {
        let h = harness();
        let clinic = ClinicID::new();
        let id = seed_appointment(&h, clinic).await;

        let err = h.engine.requeue_missed(id, 1).await.unwrap_err();
        assert!(matches!(err, QueueError::NoMissedEntry(_)));
    }

    /// Directory whose lookups work but whose status writes always fail.
    struct ReadOnlyDirectory(Arc<InMemoryAppointmentDirectory>);

    #[async_trait::async_trait]
    impl AppointmentDirectory for ReadOnlyDirectory {
        async fn get(&self, appointment_id: AppointmentID) -> Result<Option<Appointment>> {
            self.0.get(appointment_id).await
        }

        async fn set_status(
            &self,
            _appointment_id: AppointmentID,
            _status: AppointmentStatus,
        ) -> Result<()> {
            Err(QueueError::Store(
                "appointment service unavailable".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn requeue_commits_queue_row_even_if_appointment_reset_fails() {
        let directory = Arc::new(InMemoryAppointmentDirectory::new());
        let engine = Arc::new(QueueEngine::new(
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(ReadOnlyDirectory(directory.clone())),
            Arc::new(permissive_dispatcher()),
            QueueEventBus::new(64),
        ));
        let clinic = ClinicID::new();
        let appointment = appointment_for(clinic);
        let id = appointment.appointment_id;
        directory.put(appointment);

        let entry = engine.check_in(id, 1).await.unwrap();
        engine
            .update_status(entry.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        // The failing appointment write must not unwind the committed row.
        let requeued = engine.requeue_missed(id, 2).await.unwrap();
        assert_eq!(requeued.queue_id, entry.queue_id);
        assert_eq!(requeued.status, QueueStatus::InQueue);
        assert_eq!(requeued.priority, Priority::Elderly);
    }

    #[tokio::test]
    async fn requeue_rejects_invalid_priority() {
        let h = harness();
        let clinic = ClinicID::new();
        let entry = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(entry.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        let err = h
            .engine
            .requeue_missed(entry.appointment_id, 9)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn missed_entries_excludes_resolved_and_requeued() {
        let h = harness();
        let clinic = ClinicID::new();

        // Missed and still unresolved: should be listed.
        let open_missed = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(open_missed.queue_id, QueueStatus::Missed)
            .await
            .unwrap();

        // Missed but later requeued: excluded.
        let requeued = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(requeued.queue_id, QueueStatus::Missed)
            .await
            .unwrap();
        h.engine
            .requeue_missed(requeued.appointment_id, 1)
            .await
            .unwrap();

        // Requeued and eventually completed: no missed row remains, so the
        // listing must not surface it.
        let done = check_in(&h, clinic, 1).await;
        h.engine
            .update_status(done.queue_id, QueueStatus::Missed)
            .await
            .unwrap();
        h.engine
            .requeue_missed(done.appointment_id, 1)
            .await
            .unwrap();
        h.engine
            .update_status(done.queue_id, QueueStatus::Called)
            .await
            .unwrap();
        h.engine
            .update_status(done.queue_id, QueueStatus::Done)
            .await
            .unwrap();

        let missed = h.engine.missed_entries(clinic).await.unwrap();
        let ids: Vec<AppointmentID> = missed.iter().map(|e| e.appointment_id).collect();
        assert_eq!(ids, vec![open_missed.appointment_id]);
    }

    #[tokio::test]
    async fn scenario_e_three_away_fires_once_per_crossing() {
        let mut mock = MockNotificationDispatcher::new();
        mock.expect_send_confirmation().returning(|_| Ok(()));
        mock.expect_send_your_turn().returning(|_| Ok(()));
        // The whole test may cross position three exactly once.
        mock.expect_send_three_away().times(1).returning(|_| Ok(()));
        let h = harness_with(mock);
        let clinic = ClinicID::new();

        check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await;
        let third_entry = check_in(&h, clinic, 1).await;

        // Plain reads re-trigger nothing.
        h.engine.position(third_entry.appointment_id).await.unwrap();
        h.engine.active_queue(clinic).await.unwrap();
        h.engine.position(third_entry.appointment_id).await.unwrap();
    }

    #[tokio::test]
    async fn three_away_fires_again_for_new_occupant() {
        let mut mock = MockNotificationDispatcher::new();
        mock.expect_send_confirmation().returning(|_| Ok(()));
        mock.expect_send_your_turn().returning(|_| Ok(()));
        // Two different entries occupy position three over the test.
        mock.expect_send_three_away().times(2).returning(|_| Ok(()));
        let h = harness_with(mock);
        let clinic = ClinicID::new();

        check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await;
        check_in(&h, clinic, 1).await; // first crossing
        check_in(&h, clinic, 1).await; // position 4, no message

        // Head leaves; everyone shifts up and the old position-4 entry
        // becomes the new position three: second crossing.
        h.engine.call_next(clinic).await.unwrap();
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_mutation() {
        let mut mock = MockNotificationDispatcher::new();
        mock.expect_send_confirmation()
            .returning(|_| Err(QueueError::Notification("smtp down".to_string())));
        mock.expect_send_your_turn()
            .returning(|_| Err(QueueError::Notification("smtp down".to_string())));
        mock.expect_send_three_away().returning(|_| Ok(()));
        let h = harness_with(mock);
        let clinic = ClinicID::new();

        let entry = check_in(&h, clinic, 1).await;
        let called = h.engine.call_next(clinic).await.unwrap();
        assert_eq!(called.queue_id, entry.queue_id);
        assert_eq!(called.status, QueueStatus::Called);
    }

    #[tokio::test]
    async fn mark_appointment_done_completes_called_entry_only() {
        let h = harness();
        let clinic = ClinicID::new();

        // No entry at all: quietly does nothing.
        assert!(h
            .engine
            .mark_appointment_done(AppointmentID::new())
            .await
            .unwrap()
            .is_none());

        // Still waiting: left alone.
        let waiting = check_in(&h, clinic, 1).await;
        assert!(h
            .engine
            .mark_appointment_done(waiting.appointment_id)
            .await
            .unwrap()
            .is_none());

        // Called: completed.
        h.engine.call_next(clinic).await.unwrap();
        let done = h
            .engine
            .mark_appointment_done(waiting.appointment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn mutations_publish_queue_changed_events() {
        let h = harness();
        let clinic = ClinicID::new();
        let mut rx = h.engine.subscribe_events();

        check_in(&h, clinic, 1).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::QueueChanged { clinic_id: clinic }
        );

        h.engine.call_next(clinic).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::QueueChanged { clinic_id: clinic }
        );
    }

    #[tokio::test]
    async fn concurrent_check_ins_serialize_per_clinic() {
        let h = harness();
        let clinic = ClinicID::new();
        let id = seed_appointment(&h, clinic).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move { engine.check_in(id, 1).await }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(QueueError::DuplicateActiveEntry(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(h.engine.queue_count(clinic).await.unwrap(), 1);
    }
}
