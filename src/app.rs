//! Application composition root.
//!
//! Builds and wires the long-lived services — state machine, scheduler,
//! stream manager, GPS reader, solar calculator — and owns the open
//! action-dispatch table that gives the state machine's opaque action
//! labels their meaning. Everything is constructed here and passed down by
//! shared handle; no component reaches for global state.

use crate::config::Config;
use crate::detect::{SoundDetector, SpectralPeakConfig, SpectralPeakDetector};
use crate::events::{EventSink, SinkFn};
use crate::gps::GpsReader;
use crate::machine::{ActionHandler, EventStateMachine, Rule, WILDCARD};
use crate::scheduler::{Scheduler, SolarCalculator};
use crate::stream::{
    DetectProcess, HangoverConfig, PcmSource, StreamConfig, StreamManager, WavTarget,
    WavTargetConfig,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Builds a fresh audio capability per streaming session.
pub type AudioFactory =
    Box<dyn Fn() -> Box<dyn crate::audio::AudioSource> + Send + Sync>;

/// Host-level effects (power off, reboot). The default implementation only
/// logs; deployments on a recorder box plug in one that calls the OS.
pub trait SystemControl: Send + Sync {
    fn shutdown(&self);
    fn reboot(&self);
}

/// No-op control for development machines and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyControl;

impl SystemControl for LogOnlyControl {
    fn shutdown(&self) {
        tracing::warn!("system shutdown requested; no system control configured");
    }

    fn reboot(&self) {
        tracing::warn!("system reboot requested; no system control configured");
    }
}

/// The default transition rules: manual controls override the scheduler,
/// the scheduler drives recording only in `rec_auto`, pipeline faults
/// trigger a stop-and-reboot cycle, and shutdown requests power the box off.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            &["rec_auto", "rec_off"],
            &["gpio_rec_on", "mouse_rec_on", "test_rec_on"],
            "rec_on",
            &["rec_start"],
        ),
        Rule::new(
            &["rec_auto", "rec_on"],
            &["gpio_rec_off", "mouse_rec_off", "test_rec_off"],
            "rec_off",
            &["rec_stop"],
        ),
        Rule::new(
            &["rec_on", "rec_off"],
            &["gpio_rec_auto", "mouse_rec_auto", "test_rec_auto"],
            "rec_auto",
            &["rec_stop", "sleep_1s", "auto_check_state"],
        ),
        Rule::new(&["rec_auto"], &["scheduler_rec_on"], "rec_auto", &["rec_start"]),
        Rule::new(&["rec_auto"], &["scheduler_rec_off"], "rec_auto", &["rec_stop"]),
        Rule::new(
            &[WILDCARD],
            &["rec_source_warning", "rec_target_warning"],
            WILDCARD,
            &[],
        ),
        Rule::new(
            &[WILDCARD],
            &["rec_source_error", "rec_target_error"],
            WILDCARD,
            &["rec_stop", "sleep_10s", "rpi_reboot"],
        ),
        Rule::new(
            &[WILDCARD],
            &["mouse_rpi_shutdown", "gpio_rpi_shutdown"],
            "rpi_off",
            &["rec_stop", "rpi_shutdown"],
        ),
        Rule::new(
            &[WILDCARD],
            &["scheduler_restart"],
            WILDCARD,
            &["scheduler_restart"],
        ),
    ]
}

/// Open string-keyed action table, registered once at startup.
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: HashMap<String, Box<dyn Fn() + Send + Sync>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, action: &str, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.insert(action.to_string(), Box::new(handler));
    }
}

impl ActionHandler for ActionDispatcher {
    fn perform_action(&self, action: &str) {
        if action.is_empty() {
            return;
        }
        match self.handlers.get(action) {
            Some(handler) => {
                tracing::info!(action, "performing action");
                handler();
            }
            None => tracing::debug!(action, "no handler registered for action"),
        }
    }
}

/// The recorder application: constructed services plus the shutdown latch.
pub struct App {
    machine: Arc<EventStateMachine>,
    scheduler: Arc<Scheduler>,
    manager: Arc<StreamManager>,
    system: Arc<dyn SystemControl>,
    shutdown: Arc<AtomicBool>,
}

impl App {
    /// Wires the application from configuration and injected capabilities.
    pub fn new(
        config: Config,
        gps: Arc<dyn GpsReader>,
        system: Arc<dyn SystemControl>,
        audio_factory: AudioFactory,
    ) -> Self {
        let machine = Arc::new(EventStateMachine::new(&default_rules()));

        // Every component reports into the state machine's event queue.
        let sink: Arc<dyn EventSink> = {
            let machine = machine.clone();
            Arc::new(SinkFn(move |event: &str| machine.event(event)))
        };

        let solar = Arc::new(SolarCalculator::new());
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            solar,
            gps.clone(),
            sink.clone(),
        ));

        let manager = Arc::new(Self::build_manager(&config, gps, sink, audio_factory));

        Self {
            machine,
            scheduler,
            manager,
            system,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn build_manager(
        config: &Config,
        gps: Arc<dyn GpsReader>,
        sink: Arc<dyn EventSink>,
        audio_factory: AudioFactory,
    ) -> StreamManager {
        let stream_config = StreamConfig {
            source_queue_size: config.recorder.source_queue_size,
            target_queue_size: config.recorder.target_queue_size,
        };

        let buffer_frames = config.recorder.buffer_size_frames;
        let source_sink = sink.clone();
        let source_factory: crate::stream::manager::SourceFactory = Box::new(move || {
            Box::new(PcmSource::new(
                audio_factory(),
                buffer_frames,
                source_sink.clone(),
            ))
        });

        let detector_config = SpectralPeakConfig {
            sampling_rate_hz: config.recorder.in_sampling_rate_hz,
            window_size: config.detector.window_size,
            cutoff_hz: config.detector.cutoff_hz,
            threshold_dbfs: config.detector.threshold_dbfs,
        };
        let hangover = HangoverConfig {
            post_roll_buffers: config.detector.post_roll_buffers,
            pre_roll_buffers: config.detector.pre_roll_buffers,
        };
        let process_factory: crate::stream::manager::ProcessFactory = Box::new(move || {
            let detector: Box<dyn SoundDetector> =
                Box::new(SpectralPeakDetector::with_config(detector_config));
            Box::new(DetectProcess::new(detector, hangover))
        });

        let target_config = WavTargetConfig {
            dir_path: config.files.dir_path.clone(),
            prefix: config.files.prefix.clone(),
            latlong: config.files.latlong.clone(),
            rec_type: config.files.rec_type.clone(),
            out_sampling_rate_hz: config.files.out_sampling_rate_hz,
            channels: config.recorder.channels,
            in_sampling_rate_hz: config.recorder.in_sampling_rate_hz,
            max_record_length_s: config.files.max_record_length_s,
            write_batch_buffers: config.files.write_batch_buffers,
        };
        let target_factory: crate::stream::manager::TargetFactory = Box::new(move || {
            Box::new(WavTarget::new(target_config.clone(), gps.clone()))
        });

        StreamManager::new(
            stream_config,
            sink,
            source_factory,
            process_factory,
            target_factory,
        )
    }

    /// Registers the action handlers and starts the state machine and
    /// scheduler. Recording itself is started by events.
    pub fn start(&self) {
        let mut dispatcher = ActionDispatcher::new();

        let manager = self.manager.clone();
        dispatcher.register("rec_start", move || manager.start_streaming());

        let manager = self.manager.clone();
        dispatcher.register("rec_stop", move || manager.stop_streaming(false));

        let scheduler = self.scheduler.clone();
        dispatcher.register("auto_check_state", move || scheduler.check_state());

        let scheduler = self.scheduler.clone();
        dispatcher.register("scheduler_restart", move || {
            scheduler.stop();
            scheduler.start();
        });

        dispatcher.register("sleep_1s", || thread::sleep(Duration::from_secs(1)));
        dispatcher.register("sleep_10s", || thread::sleep(Duration::from_secs(10)));

        let system = self.system.clone();
        let shutdown = self.shutdown.clone();
        dispatcher.register("rpi_shutdown", move || {
            shutdown.store(true, Ordering::SeqCst);
            system.shutdown();
        });

        let system = self.system.clone();
        let shutdown = self.shutdown.clone();
        dispatcher.register("rpi_reboot", move || {
            shutdown.store(true, Ordering::SeqCst);
            system.reboot();
        });

        self.machine.set_state("rec_auto");
        self.machine.start(Arc::new(dispatcher));
        self.scheduler.start();
    }

    /// Feeds an external trigger (physical control decoders, tests) into
    /// the state machine.
    pub fn handle_event(&self, event: &str) {
        self.machine.event(event);
    }

    /// Current state-machine state label.
    pub fn state(&self) -> String {
        self.machine.current_state()
    }

    /// True while recording is running.
    pub fn is_streaming(&self) -> bool {
        self.manager.is_streaming()
    }

    /// True once a shutdown or reboot action fired.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops all services in reverse dependency order.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.manager.stop_streaming(false);
        self.machine.stop();
    }

    /// Runs until a shutdown action fires.
    pub fn run(&self) {
        self.start();
        while !self.shutdown_requested() {
            thread::sleep(Duration::from_millis(200));
        }
        tracing::info!("shutting down");
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioSource;
    use crate::gps::NoGps;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<&'static str>>,
    }

    impl SystemControl for RecordingControl {
        fn shutdown(&self) {
            self.calls.lock().unwrap().push("shutdown");
        }

        fn reboot(&self) {
            self.calls.lock().unwrap().push("reboot");
        }
    }

    fn looping_audio() -> AudioFactory {
        Box::new(|| Box::new(MockAudioSource::new(vec![vec![0i16; 64]]).looping()))
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        // No scheduler thread in these tests unless stated.
        config.scheduler.events.clear();
        config
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn manual_on_starts_streaming_and_switches_state() {
        let app = App::new(
            test_config(),
            Arc::new(NoGps),
            Arc::new(LogOnlyControl),
            looping_audio(),
        );
        app.start();

        app.handle_event("test_rec_on");
        wait_for(|| app.is_streaming());
        assert_eq!(app.state(), "rec_on");

        app.handle_event("test_rec_off");
        wait_for(|| !app.is_streaming());
        assert_eq!(app.state(), "rec_off");
        app.stop();
    }

    #[test]
    fn scheduler_events_only_drive_auto_mode() {
        let app = App::new(
            test_config(),
            Arc::new(NoGps),
            Arc::new(LogOnlyControl),
            looping_audio(),
        );
        app.start();

        // In rec_auto the scheduler may start recording.
        app.handle_event("scheduler_rec_on");
        wait_for(|| app.is_streaming());
        assert_eq!(app.state(), "rec_auto");

        // Manual off wins; a later scheduler_rec_on is ignored in rec_off.
        app.handle_event("test_rec_off");
        wait_for(|| !app.is_streaming());
        app.handle_event("scheduler_rec_on");
        thread::sleep(Duration::from_millis(300));
        assert!(!app.is_streaming());
        assert_eq!(app.state(), "rec_off");
        app.stop();
    }

    #[test]
    fn source_error_triggers_reboot_cycle() {
        let control = Arc::new(RecordingControl::default());
        let app = App::new(
            test_config(),
            Arc::new(NoGps),
            control.clone(),
            looping_audio(),
        );
        app.start();

        app.handle_event("rec_source_error");
        // rec_stop → sleep_10s → rpi_reboot; waiting through the sleep is
        // part of the contract.
        let deadline = Instant::now() + Duration::from_secs(15);
        while control.calls.lock().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "reboot not requested in time");
            thread::sleep(Duration::from_millis(100));
        }
        assert_eq!(*control.calls.lock().unwrap(), vec!["reboot"]);
        assert!(app.shutdown_requested());
        app.stop();
    }

    #[test]
    fn shutdown_event_powers_off() {
        let control = Arc::new(RecordingControl::default());
        let app = App::new(
            test_config(),
            Arc::new(NoGps),
            control.clone(),
            looping_audio(),
        );
        app.start();

        app.handle_event("mouse_rpi_shutdown");
        wait_for(|| app.shutdown_requested());
        assert_eq!(*control.calls.lock().unwrap(), vec!["shutdown"]);
        assert_eq!(app.state(), "rpi_off");
        app.stop();
    }

    #[test]
    fn dispatcher_ignores_unknown_and_empty_actions() {
        let dispatcher = ActionDispatcher::new();
        dispatcher.perform_action("");
        dispatcher.perform_action("nonexistent");
    }

    #[test]
    fn default_rules_cover_the_event_vocabulary() {
        let rules = default_rules();
        let table = crate::machine::build_table(&rules);
        // Exact keys from the declarative list.
        assert!(table.contains_key(&("rec_auto".to_string(), "scheduler_rec_on".to_string())));
        assert!(table.contains_key(&("*".to_string(), "rec_source_error".to_string())));
        assert!(table.contains_key(&("rec_off".to_string(), "gpio_rec_on".to_string())));
        // Scheduler events are deliberately absent outside rec_auto.
        assert!(!table.contains_key(&("rec_off".to_string(), "scheduler_rec_on".to_string())));
    }
}
