//! Stage roles of the sound stream pipeline.
//!
//! A pipeline is source → process → target. Each stage runs on its own
//! thread, connected by bounded channels; the runners that drive these
//! traits live in [`crate::stream::manager`].

use crate::stream::item::{StreamItem, TimedBuffer};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::atomic::AtomicBool;

/// Errors produced while a stage handles one item.
#[derive(Debug, Clone)]
pub enum StageError {
    /// The item was lost but the stage can keep going.
    Recoverable(String),
    /// The stage must shut down.
    Fatal(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

/// Producing stage: reads an external capability (audio hardware) and pushes
/// items into the pipeline.
///
/// Contract: `run` loops until `active` clears or the device ends, pushing
/// `StreamItem::Data` as buffers arrive. It must push exactly one
/// `StreamItem::EndOfStream` before returning, including on open failure.
/// The hardware read path must use bounded timeouts so `active` is observed
/// within roughly one read period.
pub trait SourceStage: Send + 'static {
    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Runs the capture loop. Blocking sends on `out` provide backpressure;
    /// captured frames are never dropped.
    fn run(&mut self, out: &Sender<StreamItem>, active: &AtomicBool);
}

/// Transforming stage: receives each data buffer and pushes zero or more
/// items downstream (data, buffered pre-roll, or `Silence` markers).
///
/// `EndOfStream` is handled by the runner, which forwards it exactly once
/// and then calls [`ProcessStage::shutdown`].
pub trait ProcessStage: Send + 'static {
    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Handles one captured buffer.
    fn process(
        &mut self,
        buffer: TimedBuffer,
        out: &Sender<StreamItem>,
    ) -> Result<(), StageError>;

    /// Called when the stage is shutting down.
    fn shutdown(&mut self) {}
}

/// Consuming stage: side effects only (file writing).
///
/// The runner feeds it `Data` and `Silence` items; on `EndOfStream` it calls
/// [`TargetStage::shutdown`], which must flush and release any open resource.
pub trait TargetStage: Send + 'static {
    /// Returns the name of this stage for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Handles one item. `Silence` must be idempotent: a no-op when no
    /// output resource is open.
    fn consume(&mut self, item: StreamItem) -> Result<(), StageError>;

    /// Drops buffered-but-unflushed output. Invoked on immediate stop.
    fn discard_pending(&mut self);

    /// Flushes and closes any open resource.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let recoverable = StageError::Recoverable("short write".to_string());
        assert_eq!(recoverable.to_string(), "Recoverable error: short write");

        let fatal = StageError::Fatal("disk full".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: disk full");
    }
}
