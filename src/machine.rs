//! Table-driven event/action state machine.
//!
//! Decouples triggers (scheduler, physical controls, pipeline faults) from
//! effects (start/stop recording, shutdown). A declarative rule list maps
//! (state, event) to (new state, ordered actions); events and actions are
//! opaque strings resolved entirely by the application layer.
//!
//! Two queues separate event arrival from action execution: the event loop
//! updates the current state and expands actions, the action loop invokes a
//! single externally supplied handler. State is mutated only on the event
//! thread, so emitters need no locking beyond the queue itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

/// Wildcard label: matches any state in a rule, or "keep the current state"
/// as a rule's new state.
pub const WILDCARD: &str = "*";

/// Queue bound for pending events and actions.
const QUEUE_CAPACITY: usize = 256;

/// Internal marker pushed on `stop()` so blocked receives wake immediately.
const STOP_SENTINEL: &str = "\u{1}stop";

/// Executor of state-machine actions. The machine itself attaches no
/// meaning to action labels.
pub trait ActionHandler: Send + Sync {
    fn perform_action(&self, action: &str);
}

/// Adapter that lets a plain closure act as an action handler.
pub struct HandlerFn<F>(pub F);

impl<F> ActionHandler for HandlerFn<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn perform_action(&self, action: &str) {
        (self.0)(action)
    }
}

/// One declarative transition rule. Applies to the cross product of its
/// states and events.
#[derive(Debug, Clone)]
pub struct Rule {
    pub states: Vec<String>,
    pub events: Vec<String>,
    pub new_state: String,
    pub actions: Vec<String>,
}

impl Rule {
    pub fn new(states: &[&str], events: &[&str], new_state: &str, actions: &[&str]) -> Self {
        Self {
            states: states.iter().map(|s| s.to_string()).collect(),
            events: events.iter().map(|s| s.to_string()).collect(),
            new_state: new_state.to_string(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

type TransitionTable = HashMap<(String, String), (String, Vec<String>)>;

/// Expands rules into the lookup table. The first rule for a
/// (state, event) pair wins; later duplicates are logged and ignored.
pub(crate) fn build_table(rules: &[Rule]) -> TransitionTable {
    let mut table = TransitionTable::new();
    for rule in rules {
        for state in &rule.states {
            for event in &rule.events {
                let key = (state.clone(), event.clone());
                if table.contains_key(&key) {
                    tracing::debug!(%state, %event, "duplicate state machine rule ignored");
                } else {
                    table.insert(key, (rule.new_state.clone(), rule.actions.clone()));
                }
            }
        }
    }
    table
}

/// The state machine. Build with [`EventStateMachine::new`], then `start`
/// with an action handler; `stop` is terminal until the next `start`.
pub struct EventStateMachine {
    table: Arc<TransitionTable>,
    current: Arc<Mutex<String>>,
    active: Arc<AtomicBool>,
    event_tx: Sender<String>,
    event_rx: Receiver<String>,
    action_tx: Sender<String>,
    action_rx: Receiver<String>,
    action_delay: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EventStateMachine {
    pub fn new(rules: &[Rule]) -> Self {
        let (event_tx, event_rx) = bounded(QUEUE_CAPACITY);
        let (action_tx, action_rx) = bounded(QUEUE_CAPACITY);
        Self {
            table: Arc::new(build_table(rules)),
            current: Arc::new(Mutex::new("idle".to_string())),
            active: Arc::new(AtomicBool::new(false)),
            event_tx,
            event_rx,
            action_tx,
            action_rx,
            action_delay: Duration::from_millis(crate::defaults::ACTION_DELAY_MS),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the inter-action delay (tests use a short one).
    pub fn with_action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn set_state(&self, state: &str) {
        *self.current.lock().expect("state lock poisoned") = state.to_string();
    }

    pub fn current_state(&self) -> String {
        self.current.lock().expect("state lock poisoned").clone()
    }

    /// Enqueues an event. Safe to call from any thread; a full queue drops
    /// the event with an error log rather than blocking the emitter.
    pub fn event(&self, event: &str) {
        tracing::debug!(event, "event added to queue");
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self.event_tx.try_send(event.to_string()).is_err() {
            tracing::error!(event, "event queue is full, event dropped");
        }
    }

    /// Spawns the event and action loops.
    pub fn start(&self, handler: Arc<dyn ActionHandler>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.handles.lock().expect("handles lock poisoned");

        let table = self.table.clone();
        let current = self.current.clone();
        let active = self.active.clone();
        let event_rx = self.event_rx.clone();
        let action_tx = self.action_tx.clone();
        let action_delay = self.action_delay;
        handles.push(thread::spawn(move || {
            event_loop(table, current, active, event_rx, action_tx, action_delay);
        }));

        let active = self.active.clone();
        let action_rx = self.action_rx.clone();
        handles.push(thread::spawn(move || {
            action_loop(active, action_rx, handler);
        }));
    }

    /// Stops both loops and waits for them. Queued-but-unprocessed entries
    /// are abandoned.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake both loops so they observe the cleared flag promptly.
        let _ = self.event_tx.try_send(STOP_SENTINEL.to_string());
        let _ = self.action_tx.try_send(STOP_SENTINEL.to_string());
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().expect("handles lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for EventStateMachine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    table: Arc<TransitionTable>,
    current: Arc<Mutex<String>>,
    active: Arc<AtomicBool>,
    event_rx: Receiver<String>,
    action_tx: Sender<String>,
    action_delay: Duration,
) {
    while active.load(Ordering::SeqCst) {
        let event = match event_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if event == STOP_SENTINEL {
            continue;
        }

        let state = current.lock().expect("state lock poisoned").clone();
        tracing::info!(%event, %state, "event executed");

        let hit = table
            .get(&(state.clone(), event.clone()))
            .or_else(|| table.get(&(WILDCARD.to_string(), event.clone())));
        let Some((new_state, actions)) = hit else {
            tracing::error!(%state, %event, "no rule for state/event");
            continue;
        };

        if new_state != WILDCARD {
            tracing::info!(old = %state, new = %new_state, "state changed");
            *current.lock().expect("state lock poisoned") = new_state.clone();
        }
        for action in actions {
            // Release the thread between actions so concurrent emitters can
            // interleave and the action queue never bursts.
            thread::sleep(action_delay);
            if action_tx.try_send(action.clone()).is_err() {
                tracing::error!(%action, "action queue is full, action dropped");
            }
        }
    }
}

fn action_loop(active: Arc<AtomicBool>, action_rx: Receiver<String>, handler: Arc<dyn ActionHandler>) {
    while active.load(Ordering::SeqCst) {
        let action = match action_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(action) => action,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if action == STOP_SENTINEL {
            continue;
        }
        handler.perform_action(&action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn recording_handler() -> (Arc<dyn ActionHandler>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let handler = Arc::new(HandlerFn(move |action: &str| {
            log_clone.lock().unwrap().push(action.to_string());
        }));
        (handler, log)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn test_machine(rules: &[Rule]) -> EventStateMachine {
        EventStateMachine::new(rules).with_action_delay(Duration::from_millis(1))
    }

    #[test]
    fn rule_transitions_and_fires_actions_in_order() {
        let rules = [Rule::new(&["idle"], &["go"], "running", &["a1", "a2"])];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.set_state("idle");
        machine.start(handler);
        machine.event("go");

        wait_for(|| log.lock().unwrap().len() == 2);
        assert_eq!(*log.lock().unwrap(), vec!["a1", "a2"]);
        assert_eq!(machine.current_state(), "running");
        machine.stop();
    }

    #[test]
    fn unmatched_event_is_a_logged_noop() {
        let rules = [Rule::new(&["idle"], &["go"], "running", &["a1"])];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.set_state("elsewhere");
        machine.start(handler);
        machine.event("go");

        thread::sleep(Duration::from_millis(100));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(machine.current_state(), "elsewhere");
        machine.stop();
    }

    #[test]
    fn wildcard_state_matches_anywhere() {
        let rules = [Rule::new(&[WILDCARD], &["fault"], "safe", &["halt"])];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.set_state("whatever");
        machine.start(handler);
        machine.event("fault");

        wait_for(|| log.lock().unwrap().len() == 1);
        assert_eq!(machine.current_state(), "safe");
        machine.stop();
    }

    #[test]
    fn wildcard_new_state_keeps_current() {
        let rules = [Rule::new(&["rec_auto"], &["tick"], WILDCARD, &["noted"])];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.set_state("rec_auto");
        machine.start(handler);
        machine.event("tick");

        wait_for(|| log.lock().unwrap().len() == 1);
        assert_eq!(machine.current_state(), "rec_auto");
        machine.stop();
    }

    #[test]
    fn exact_rule_beats_wildcard() {
        let rules = [
            Rule::new(&["idle"], &["go"], "exact", &[]),
            Rule::new(&[WILDCARD], &["go"], "fallback", &[]),
        ];
        let machine = test_machine(&rules);
        let (handler, _log) = recording_handler();

        machine.set_state("idle");
        machine.start(handler);
        machine.event("go");

        wait_for(|| machine.current_state() == "exact");
        machine.stop();
    }

    #[test]
    fn events_before_start_or_after_stop_are_ignored() {
        let rules = [Rule::new(&["idle"], &["go"], "running", &["a1"])];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.set_state("idle");
        machine.event("go"); // not started yet

        machine.start(handler);
        machine.stop();
        machine.event("go"); // stopped

        thread::sleep(Duration::from_millis(50));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(machine.current_state(), "idle");
    }

    #[test]
    fn build_table_expands_cross_product_first_wins() {
        let rules = [
            Rule::new(&["a", "b"], &["x", "y"], "s1", &["act"]),
            Rule::new(&["a"], &["x"], "s2", &["other"]),
        ];
        let table = build_table(&rules);
        assert_eq!(table.len(), 4);
        let (new_state, actions) = &table[&("a".to_string(), "x".to_string())];
        assert_eq!(new_state, "s1");
        assert_eq!(actions, &vec!["act".to_string()]);
        assert!(table.contains_key(&("b".to_string(), "y".to_string())));
    }

    #[test]
    fn interleaved_events_keep_per_event_action_order() {
        let rules = [
            Rule::new(&[WILDCARD], &["e1"], WILDCARD, &["e1_a", "e1_b"]),
            Rule::new(&[WILDCARD], &["e2"], WILDCARD, &["e2_a", "e2_b"]),
        ];
        let machine = test_machine(&rules);
        let (handler, log) = recording_handler();

        machine.start(handler);
        machine.event("e1");
        machine.event("e2");

        wait_for(|| log.lock().unwrap().len() == 4);
        let actions = log.lock().unwrap().clone();
        // Events are processed serially from one queue, so each event's
        // actions stay contiguous and in declared order.
        assert_eq!(actions, vec!["e1_a", "e1_b", "e2_a", "e2_b"]);
        machine.stop();
    }
}
