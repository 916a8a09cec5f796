use crate::sink::EventSink;
use crate::types::Event;
use tokio::sync::broadcast;

/// Fan-out sink for in-process subscribers. Events published with no live
/// subscriber are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) -> Result<(), broadcast::error::SendError<Event>> {
        self.sender.send(event).map(|_| ())
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) {
        let _ = self.publish(event);
    }
}
