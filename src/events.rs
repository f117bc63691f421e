//! Shared event channel between the pipeline, scheduler and state machine.
//!
//! Components never call each other directly; they emit plain string events
//! (`scheduler_rec_on`, `rec_source_error`, ...) through an [`EventSink`]
//! handed to them at construction. The composition root wires every sink to
//! the state machine's event queue.

use std::sync::Arc;

/// Receiver of domain events. Implementations must be cheap and non-blocking;
/// emitters call this from capture and scheduler threads.
pub trait EventSink: Send + Sync {
    /// Delivers one named event.
    fn emit(&self, event: &str);
}

/// Adapter that lets a plain closure act as an event sink.
pub struct SinkFn<F>(pub F);

impl<F> EventSink for SinkFn<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, event: &str) {
        (self.0)(event)
    }
}

/// Sink that discards all events. Used when a component runs stand-alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &str) {}
}

/// Sink that records events in order, for tests.
#[derive(Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<String>>,
}

impl RecordingEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("event sink poisoned").clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &str) {
        self.events
            .lock()
            .expect("event sink poisoned")
            .push(event.to_string());
    }
}
