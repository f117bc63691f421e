//! Day/night recording scheduler.
//!
//! Translates configured daily trigger entries — absolute times or solar
//! event names with signed minute offsets — into `scheduler_rec_on` /
//! `scheduler_rec_off` events on the shared callback channel. Solar times
//! are resolved once per calendar day; around local noon the scheduler
//! terminates itself and emits `scheduler_restart` so the composition root
//! re-arms it with fresh times for the coming night.

pub mod solar;

pub use solar::{SolarCalculator, SolarTimes};

use crate::config::SchedulerConfig;
use crate::defaults;
use crate::error::{EchologError, Result};
use crate::events::EventSink;
use crate::gps::GpsReader;
use chrono::{DateTime, Local, NaiveTime, Timelike};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Wall clock abstraction so tests can pin "now".
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// One configured trigger before daily resolution.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EventSpec {
    pub action: String,
    /// Literal `"HH:MM"` or a solar event name.
    pub time_spec: String,
    pub offset_minutes: i64,
}

/// One trigger with its concrete time of day for the current date.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    pub action: String,
    pub time: NaiveTime,
}

/// Parses `"action/time-or-solar-event/signed-minutes"`. The offset part is
/// optional and defaults to zero.
pub(crate) fn parse_event(entry: &str) -> Result<EventSpec> {
    let parts: Vec<&str> = entry.split('/').map(str::trim).collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(EchologError::SchedulerEvent {
            entry: entry.to_string(),
            message: "expected action/time[/offset]".to_string(),
        });
    }
    let offset_minutes = match parts.get(2) {
        None | Some(&"") => 0,
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| EchologError::SchedulerEvent {
                entry: entry.to_string(),
                message: format!("offset \"{}\" is not a signed minute count", raw),
            })?,
    };
    let time_spec = parts[1].to_string();
    if !is_solar_name(&time_spec) && NaiveTime::parse_from_str(&time_spec, "%H:%M").is_err() {
        return Err(EchologError::SchedulerEvent {
            entry: entry.to_string(),
            message: format!("\"{}\" is neither HH:MM nor a solar event", time_spec),
        });
    }
    Ok(EventSpec {
        action: parts[0].to_string(),
        time_spec,
        offset_minutes,
    })
}

fn is_solar_name(spec: &str) -> bool {
    matches!(spec, "sunset" | "dusk" | "dawn" | "sunrise")
}

/// Parses all entries; invalid ones are logged and skipped so one typo does
/// not take the whole schedule down.
pub(crate) fn parse_events(entries: &[String]) -> Vec<EventSpec> {
    entries
        .iter()
        .filter_map(|entry| match parse_event(entry) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::error!(error = %e, "skipping scheduler event");
                None
            }
        })
        .collect()
}

/// Substitutes solar names, applies offsets and sorts ascending by time.
/// The configured set is preserved as-is; duplicates are not removed.
pub(crate) fn resolve_events(specs: &[EventSpec], solar: &SolarTimes) -> Vec<ResolvedEvent> {
    let mut events: Vec<ResolvedEvent> = specs
        .iter()
        .filter_map(|spec| {
            let base = match spec.time_spec.as_str() {
                "sunset" => solar.sunset,
                "dusk" => solar.dusk,
                "dawn" => solar.dawn,
                "sunrise" => solar.sunrise,
                literal => match NaiveTime::parse_from_str(literal, "%H:%M") {
                    Ok(time) => time,
                    Err(e) => {
                        tracing::error!(entry = literal, error = %e, "failed to resolve event time");
                        return None;
                    }
                },
            };
            let (time, _) = base.overflowing_add_signed(chrono::Duration::minutes(
                spec.offset_minutes,
            ));
            Some(ResolvedEvent {
                action: spec.action.clone(),
                time,
            })
        })
        .collect();
    events.sort_by_key(|event| event.time);
    events
}

/// Determines the recording state already in effect at `now`, and the index
/// of the first event still ahead.
///
/// The first pass over the whole (sorted) list yields the state carried
/// over from the previous day — the schedule is circular, so the last
/// on/off of yesterday is still in force before today's first event. The
/// second pass applies every event at or before `now`.
pub(crate) fn initial_rec_state(events: &[ResolvedEvent], now: NaiveTime) -> (bool, usize) {
    let mut rec_on = false;
    for event in events {
        match event.action.as_str() {
            "scheduler_rec_on" => rec_on = true,
            "scheduler_rec_off" => rec_on = false,
            _ => {}
        }
    }

    let mut next_index = 0;
    for (index, event) in events.iter().enumerate() {
        if event.time < now {
            next_index = index + 1;
            match event.action.as_str() {
                "scheduler_rec_on" => rec_on = true,
                "scheduler_rec_off" => rec_on = false,
                _ => {}
            }
        }
    }
    (rec_on, next_index)
}

/// Solar times used when the computation fails (polar day/night, bad
/// coordinates). Keeps a usable bat-survey window instead of going dark.
fn fallback_solar_times() -> SolarTimes {
    let hm = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
    SolarTimes {
        dawn: hm(defaults::FALLBACK_DAWN),
        sunrise: hm(defaults::FALLBACK_SUNRISE),
        sunset: hm(defaults::FALLBACK_SUNSET),
        dusk: hm(defaults::FALLBACK_DUSK),
    }
}

/// The scheduler. Runs one background thread per armed day; see the module
/// docs for the restart protocol.
pub struct Scheduler {
    config: SchedulerConfig,
    solar: Arc<SolarCalculator>,
    gps: Arc<dyn GpsReader>,
    events_out: Arc<dyn EventSink>,
    clock: Arc<dyn WallClock>,
    rec_on: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        solar: Arc<SolarCalculator>,
        gps: Arc<dyn GpsReader>,
        events_out: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            solar,
            gps,
            events_out,
            clock: Arc::new(SystemClock),
            rec_on: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Overrides the wall clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether the schedule currently calls for recording.
    pub fn is_rec_on(&self) -> bool {
        self.rec_on.load(Ordering::SeqCst)
    }

    /// Re-emits the current on/off state. Driven by the state machine's
    /// `auto_check_state` action when returning to automatic mode.
    pub fn check_state(&self) {
        if self.is_rec_on() {
            self.events_out.emit("scheduler_rec_on");
        } else {
            self.events_out.emit("scheduler_rec_off");
        }
    }

    /// Arms the scheduler for the current day. No-op when already running
    /// or when no trigger entries are configured.
    pub fn start(&self) {
        if self.config.events.is_empty() {
            tracing::warn!("no scheduler events configured, scheduler not started");
            return;
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        // Reap the previous day's thread before re-arming.
        if let Some(handle) = self.handle.lock().expect("scheduler lock poisoned").take() {
            let _ = handle.join();
        }

        let run = RunContext {
            config: self.config.clone(),
            solar: self.solar.clone(),
            gps: self.gps.clone(),
            events_out: self.events_out.clone(),
            clock: self.clock.clone(),
            rec_on: self.rec_on.clone(),
            active: self.active.clone(),
        };
        let handle = thread::spawn(move || run.run());
        *self.handle.lock().expect("scheduler lock poisoned") = Some(handle);
    }

    /// Stops the scheduler thread and waits for it.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().expect("scheduler lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RunContext {
    config: SchedulerConfig,
    solar: Arc<SolarCalculator>,
    gps: Arc<dyn GpsReader>,
    events_out: Arc<dyn EventSink>,
    clock: Arc<dyn WallClock>,
    rec_on: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl RunContext {
    fn run(self) {
        let (latitude, longitude) = self.read_position();
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let start_time = self.local_now();
        let today = start_time.date_naive();
        let solar_times = match self
            .solar
            .solar_times_local(latitude, longitude, today)
        {
            Ok(times) => times,
            Err(e) => {
                tracing::warn!(error = %e, "solar computation failed, using fallback window");
                fallback_solar_times()
            }
        };
        tracing::info!(
            %today,
            latitude,
            longitude,
            sunset = %solar_times.sunset,
            dusk = %solar_times.dusk,
            dawn = %solar_times.dawn,
            sunrise = %solar_times.sunrise,
            "daily schedule resolved"
        );

        let specs = parse_events(&self.config.events);
        let events = resolve_events(&specs, &solar_times);
        if events.is_empty() {
            tracing::warn!("no valid scheduler events, scheduler idle");
            self.active.store(false, Ordering::SeqCst);
            return;
        }
        for event in &events {
            tracing::info!(action = %event.action, time = %event.time, "scheduled event");
        }

        let (mut rec_on, mut next_index) = initial_rec_state(&events, self.local_now().time());
        self.rec_on.store(rec_on, Ordering::SeqCst);
        self.emit_state(rec_on);
        let mut rec_on_old = rec_on;

        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default();
        let started_before_noon = start_time.time() < noon;
        let mut current_date = today;

        loop {
            if !self.active.load(Ordering::SeqCst) {
                return;
            }
            let now = self.local_now();

            // New calendar day: scan the (still yesterday's) list from the
            // top again so the morning events fire. The noon restart below
            // replaces the list with freshly resolved times soon after.
            if now.date_naive() != current_date {
                current_date = now.date_naive();
                next_index = 0;
            }

            // Daily re-arm: terminate around noon so the owner rebuilds the
            // scheduler with fresh solar times for the coming night.
            let crossed_noon = now.time().hour() >= 12
                && (now.date_naive() > start_time.date_naive() || started_before_noon);
            if crossed_noon {
                tracing::info!("noon reached, scheduler requesting restart");
                self.active.store(false, Ordering::SeqCst);
                self.events_out.emit("scheduler_restart");
                return;
            }

            // Fire newly elapsed events in order.
            while next_index < events.len() && now.time() > events[next_index].time {
                let event = &events[next_index];
                next_index += 1;
                tracing::info!(action = %event.action, time = %event.time, "scheduler event fired");
                match event.action.as_str() {
                    "scheduler_rec_on" => rec_on = true,
                    "scheduler_rec_off" => rec_on = false,
                    // Arbitrary state machine actions pass through verbatim.
                    other => self.events_out.emit(other),
                }
            }

            if rec_on != rec_on_old {
                self.rec_on.store(rec_on, Ordering::SeqCst);
                self.emit_state(rec_on);
                rec_on_old = rec_on;
            }

            // Sleep ~1 s, staying responsive to stop.
            for _ in 0..10 {
                if !self.active.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    /// GPS time when available and enabled, else the injected clock.
    fn local_now(&self) -> DateTime<Local> {
        if self.config.use_gps {
            if let Some(time) = self.gps.get_time_local() {
                return time;
            }
        }
        self.clock.now()
    }

    /// Configured coordinates, replaced by the GPS fix when enabled. The
    /// optional startup wait blocks until a fix arrives or the scheduler is
    /// stopped.
    fn read_position(&self) -> (f64, f64) {
        let mut latitude = self.config.latitude;
        let mut longitude = self.config.longitude;
        if !self.config.use_gps {
            return (latitude, longitude);
        }

        if self.config.wait_for_gps_at_startup {
            tracing::info!("waiting for GPS time and position");
            while self.gps.get_latitude().is_none()
                || self.gps.get_longitude().is_none()
                || self.gps.get_time_local().is_none()
            {
                if !self.active.load(Ordering::SeqCst) {
                    tracing::info!("waiting for GPS was terminated");
                    return (latitude, longitude);
                }
                thread::sleep(Duration::from_millis(200));
            }
            tracing::info!("received GPS time and position");
        }

        if let Some(lat) = self.gps.get_latitude() {
            latitude = lat;
        }
        if let Some(long) = self.gps.get_longitude() {
            longitude = long;
        }
        (latitude, longitude)
    }

    fn emit_state(&self, rec_on: bool) {
        if rec_on {
            self.events_out.emit("scheduler_rec_on");
        } else {
            self.events_out.emit("scheduler_rec_off");
        }
    }
}
