//! Owns the pipeline's queues and threads.
//!
//! `StreamManager` wires source → process → target over bounded channels
//! and runs each stage on its own thread. Queues are allocated before any
//! thread spawns, so the wiring exists before the first item flows.
//! Shutdown is cooperative: the source observes its stop flag within one
//! bounded read, pushes `EndOfStream`, and the marker unwinds the chain.

use crate::events::EventSink;
use crate::stream::item::StreamItem;
use crate::stream::stage::{ProcessStage, SourceStage, StageError, TargetStage};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Queue bounds for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Source → process queue capacity, in buffers.
    pub source_queue_size: usize,
    /// Process → target queue capacity, in buffers.
    pub target_queue_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source_queue_size: crate::defaults::SOURCE_QUEUE_SIZE,
            target_queue_size: crate::defaults::TARGET_QUEUE_SIZE,
        }
    }
}

/// Builds a fresh stage for each streaming session. Stages are consumed by
/// their threads, so restarts need new instances.
pub type SourceFactory = Box<dyn Fn() -> Box<dyn SourceStage> + Send + Sync>;
pub type ProcessFactory = Box<dyn Fn() -> Box<dyn ProcessStage> + Send + Sync>;
pub type TargetFactory = Box<dyn Fn() -> Box<dyn TargetStage> + Send + Sync>;

struct Running {
    active: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Running {
    fn is_alive(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

/// Manager for the three-stage sound stream.
pub struct StreamManager {
    config: StreamConfig,
    events: Arc<dyn EventSink>,
    source_factory: SourceFactory,
    process_factory: ProcessFactory,
    target_factory: TargetFactory,
    running: Mutex<Option<Running>>,
}

impl StreamManager {
    pub fn new(
        config: StreamConfig,
        events: Arc<dyn EventSink>,
        source_factory: SourceFactory,
        process_factory: ProcessFactory,
        target_factory: TargetFactory,
    ) -> Self {
        Self {
            config,
            events,
            source_factory,
            process_factory,
            target_factory,
            running: Mutex::new(None),
        }
    }

    /// Starts the three stages. No-op when a session is already running.
    pub fn start_streaming(&self) {
        let mut running = self.running.lock().expect("stream manager lock poisoned");
        if let Some(session) = running.as_ref() {
            if session.is_alive() {
                tracing::debug!("streaming already active");
                return;
            }
        }
        // Reap a finished session before starting over.
        if let Some(session) = running.take() {
            for handle in session.handles {
                let _ = handle.join();
            }
        }

        tracing::info!("starting sound stream");
        let active = Arc::new(AtomicBool::new(true));
        let discard = Arc::new(AtomicBool::new(false));

        // All queues exist before any stage thread spawns.
        let (source_tx, source_rx) = bounded(self.config.source_queue_size);
        let (target_tx, target_rx) = bounded(self.config.target_queue_size);

        let mut handles = Vec::with_capacity(3);

        let target = (self.target_factory)();
        let target_discard = discard.clone();
        let target_events = self.events.clone();
        handles.push(thread::spawn(move || {
            run_target(target, target_rx, target_discard, target_events);
        }));

        let process = (self.process_factory)();
        handles.push(thread::spawn(move || {
            run_process(process, source_rx, target_tx);
        }));

        let mut source = (self.source_factory)();
        let source_active = active.clone();
        handles.push(thread::spawn(move || {
            source.run(&source_tx, &source_active);
        }));

        *running = Some(Running {
            active,
            discard,
            handles,
        });
    }

    /// Stops the stream cooperatively and waits for the stages to finish.
    ///
    /// With `immediate`, buffered-but-unflushed output is discarded instead
    /// of drained.
    pub fn stop_streaming(&self, immediate: bool) {
        let session = self
            .running
            .lock()
            .expect("stream manager lock poisoned")
            .take();
        let Some(session) = session else {
            return;
        };

        tracing::info!(immediate, "stopping sound stream");
        session.active.store(false, Ordering::SeqCst);
        if immediate {
            session.discard.store(true, Ordering::SeqCst);
        }
        for handle in session.handles {
            let _ = handle.join();
        }
    }

    /// True while any stage thread is still running.
    pub fn is_streaming(&self) -> bool {
        self.running
            .lock()
            .expect("stream manager lock poisoned")
            .as_ref()
            .is_some_and(Running::is_alive)
    }
}

/// Drives a process stage: data is handed to the stage, `Silence` passes
/// through, and `EndOfStream` (or a closed input) ends the loop. The marker
/// is forwarded exactly once, after the stage's shutdown hook.
pub(crate) fn run_process(
    mut stage: Box<dyn ProcessStage>,
    input: Receiver<StreamItem>,
    output: Sender<StreamItem>,
) {
    loop {
        match input.recv() {
            Ok(StreamItem::Data(buffer)) => match stage.process(buffer, &output) {
                Ok(()) => {}
                Err(StageError::Recoverable(msg)) => {
                    tracing::warn!(stage = stage.name(), "{}", msg);
                }
                Err(StageError::Fatal(msg)) => {
                    tracing::error!(stage = stage.name(), "{}", msg);
                    break;
                }
            },
            Ok(StreamItem::Silence) => {
                if output.send(StreamItem::Silence).is_err() {
                    break;
                }
            }
            Ok(StreamItem::EndOfStream) | Err(_) => break,
        }
    }
    stage.shutdown();
    tracing::debug!(stage = stage.name(), "process stage terminated");
    let _ = output.send(StreamItem::EndOfStream);
}

/// Drives a target stage until `EndOfStream` (or a closed input), then runs
/// its shutdown hook so any open file is flushed and closed. A fatal
/// consume error surfaces as `rec_target_error`; the discard flag switches
/// the loop to dropping data while control markers still pass.
pub(crate) fn run_target(
    mut stage: Box<dyn TargetStage>,
    input: Receiver<StreamItem>,
    discard: Arc<AtomicBool>,
    events: Arc<dyn EventSink>,
) {
    let mut discarding = false;
    loop {
        if !discarding && discard.load(Ordering::SeqCst) {
            discarding = true;
            stage.discard_pending();
        }
        match input.recv_timeout(Duration::from_millis(200)) {
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
            Ok(StreamItem::EndOfStream) => break,
            Ok(item) => {
                if discarding && item.is_data() {
                    continue;
                }
                match stage.consume(item) {
                    Ok(()) => {}
                    Err(StageError::Recoverable(msg)) => {
                        tracing::warn!(stage = stage.name(), "{}", msg);
                    }
                    Err(StageError::Fatal(msg)) => {
                        tracing::error!(stage = stage.name(), "{}", msg);
                        events.emit("rec_target_error");
                        break;
                    }
                }
            }
        }
    }
    stage.shutdown();
    tracing::debug!(stage = stage.name(), "target stage terminated");
}
