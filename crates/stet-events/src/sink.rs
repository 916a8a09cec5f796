use crate::types::Event;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Receiver of run events. Emission never fails the run; sinks swallow their
/// own I/O errors.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Writes one JSON object per line and flushes after each event so consumers
/// tailing the stream see progress immediately.
pub struct NdjsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for NdjsonSink<W> {
    fn emit(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode event");
                return;
            }
        };
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        if writeln!(writer, "{line}").and_then(|()| writer.flush()).is_err() {
            tracing::warn!("failed to write event");
        }
    }
}

/// Keeps every event in memory; used by tests and by callers that post-process
/// the stream.
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, event: Event) {
        (**self).emit(event);
    }
}
