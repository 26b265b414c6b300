use medq_model::ClinicID;
use tokio::sync::broadcast;

/// Notices the engine publishes after every committed queue mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The composition of a clinic's active queue changed: a check-in, a
    /// status transition, a call, or a requeue.
    QueueChanged { clinic_id: ClinicID },
}

/// Lightweight in-process event bus fanning queue notices out to observers
/// (the live update hub today; anything else that subscribes tomorrow).
/// Publishing never blocks and never fails: a send with no receivers is a
/// no-op.
#[derive(Debug, Clone)]
pub struct QueueEventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl QueueEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QueueEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = QueueEventBus::new(8);
        bus.publish(QueueEvent::QueueChanged {
            clinic_id: ClinicID::new(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = QueueEventBus::new(8);
        let mut rx = bus.subscribe();
        let clinic_id = ClinicID::new();

        bus.publish(QueueEvent::QueueChanged { clinic_id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, QueueEvent::QueueChanged { clinic_id });
    }
}
