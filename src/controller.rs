//! The control loop: one thread that owns every state transition.
//!
//! All background producers (the switch interrupt callback, the signal
//! watcher) send [`ControlEvent`]s through a single bounded channel. The
//! loop receives with a timeout aimed at the next poll deadline, so a
//! shutdown event interrupts any sleep — including the warmup and cooldown
//! holds — immediately. Connectivity checks and alert transmissions run
//! synchronously on this thread with bounded timeouts; the LED-signaling
//! lock is never held across either.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::connectivity::ConnectivityChecker;
use crate::constants::EVENT_CHANNEL_BOUND;
use crate::monitor::SwitchMonitor;
use crate::signaler::{Pattern, Signaler};
use crate::transmitter::{AlertOutcome, AlertTransmit};

/// Event delivered to the control loop.
///
/// Producers never block: both the interrupt callback and the signal
/// watcher `try_send` into the bounded channel and drop on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The alert switch closed (debounced falling edge).
    SwitchPressed,
    /// SIGINT/SIGTERM arrived; unwind and release the hardware.
    Shutdown,
}

/// Where the loop currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No link (or not checked yet); monitor disarmed, LED fast-pulsing.
    Disconnected,
    /// Warming up before a re-check; LED slow-pulsing.
    Retrying,
    /// Link confirmed; monitor armed, LED solid on.
    Connected,
    /// A press is being transmitted; monitor disarmed for the duration.
    AlertInFlight,
    /// Delivered; LED breathing for the cooldown window.
    AlertSuccess,
    /// Transmission rejected or lost; treated like a lost link until the
    /// next poll tick.
    AlertFailed,
}

/// Outcome of one dispatch: keep looping or unwind.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// Timing knobs for the control loop, split out of [`Config`] so tests can
/// run with millisecond values.
#[derive(Debug, Clone, Copy)]
pub struct LoopTimings {
    /// Interval between connectivity checks.
    pub poll_interval: Duration,
    /// Slow-pulse hold before re-checking a lost link.
    pub warmup: Duration,
    /// Breathing hold after a delivered alert.
    pub cooldown: Duration,
}

impl From<&Config> for LoopTimings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval),
            warmup: Duration::from_secs(config.warmup),
            cooldown: Duration::from_secs(config.cooldown),
        }
    }
}

/// Orchestrates signaler, monitor, checker and transmitter on a fixed
/// polling cadence, reacting immediately to interrupt-driven events.
///
/// The controller is the only writer of the connectivity and arm state.
pub struct Controller {
    signaler: Arc<Signaler>,
    monitor: SwitchMonitor,
    checker: ConnectivityChecker,
    transmitter: Box<dyn AlertTransmit>,
    events_tx: SyncSender<ControlEvent>,
    events_rx: Receiver<ControlEvent>,
    timings: LoopTimings,
    breathing: Pattern,
    state: LoopState,
    /// Whether the previous check (or alert) failed; drives the warmup blink.
    link_was_down: bool,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state)
            .field("link_was_down", &self.link_was_down)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        signaler: Arc<Signaler>,
        monitor: SwitchMonitor,
        checker: ConnectivityChecker,
        transmitter: Box<dyn AlertTransmit>,
        timings: LoopTimings,
        breathing: Pattern,
    ) -> Self {
        let (events_tx, events_rx) = sync_channel(EVENT_CHANNEL_BOUND);
        Self {
            signaler,
            monitor,
            checker,
            transmitter,
            events_tx,
            events_rx,
            timings,
            breathing,
            // Starting "down" forces the warmup blink on the very first check.
            state: LoopState::Disconnected,
            link_was_down: true,
        }
    }

    /// Sender handle for external producers (the signal watcher).
    pub fn event_sender(&self) -> SyncSender<ControlEvent> {
        self.events_tx.clone()
    }

    /// Current state, for logs and tests.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until a shutdown event arrives (or every sender is gone).
    pub fn run(&mut self) {
        log::info!("Starting main loop...");
        let mut next_poll = Instant::now();

        loop {
            let now = Instant::now();
            if now >= next_poll {
                if self.poll_tick() == Flow::Shutdown {
                    break;
                }
                next_poll = Instant::now() + self.timings.poll_interval;
                continue;
            }

            match self.events_rx.recv_timeout(next_poll - now) {
                Ok(ControlEvent::SwitchPressed) => {
                    if self.handle_press() == Flow::Shutdown {
                        break;
                    }
                }
                Ok(ControlEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        self.shutdown();
    }

    /// One poll tick: optional warmup blink, then the connectivity check.
    fn poll_tick(&mut self) -> Flow {
        if self.link_was_down {
            // Give the slow "about to retry" signal before probing again.
            self.state = LoopState::Retrying;
            self.signaler.set(Pattern::slow_pulse());
            if self.pause(self.timings.warmup) == Flow::Shutdown {
                return Flow::Shutdown;
            }
        }

        if self.checker.check() {
            log::info!("Connection confirmed. Sleeping easy...");
            self.signaler.set(Pattern::SolidOn);
            if !self.monitor.is_armed() {
                if let Err(e) = self.monitor.arm(self.events_tx.clone()) {
                    log::error!("Failed to arm the alert switch: {e:#}");
                }
            }
            self.state = LoopState::Connected;
            self.link_was_down = false;
        } else {
            self.signaler.set(Pattern::fast_pulse());
            if let Err(e) = self.monitor.disarm() {
                log::error!("Failed to disarm the alert switch: {e:#}");
            }
            self.state = LoopState::Disconnected;
            self.link_was_down = true;
        }

        Flow::Continue
    }

    /// A qualifying press: disarm, transmit, show the outcome.
    fn handle_press(&mut self) -> Flow {
        if !self.monitor.is_armed() {
            // A press queued just before a disarm; presses only count while
            // armed.
            log::debug!("Ignoring switch press: monitor is disarmed");
            return Flow::Continue;
        }

        self.state = LoopState::AlertInFlight;
        if let Err(e) = self.monitor.disarm() {
            log::error!("Failed to disarm the alert switch: {e:#}");
        }

        log::warn!("==============================================");
        log::warn!(">>>>>>>>>>>>>>>>>> ALARM! <<<<<<<<<<<<<<<<<<<<");
        log::warn!("==============================================");
        log::info!("Transmitting distress call...");

        match self.transmitter.send_alert() {
            AlertOutcome::Delivered => {
                log::info!("Distress call transmitted successfully.");
                self.state = LoopState::AlertSuccess;
                self.signaler.set(self.breathing);
                if self.pause(self.timings.cooldown) == Flow::Shutdown {
                    return Flow::Shutdown;
                }
                if let Err(e) = self.monitor.arm(self.events_tx.clone()) {
                    log::error!("Failed to re-arm the alert switch: {e:#}");
                }
                self.signaler.set(Pattern::SolidOn);
                self.state = LoopState::Connected;
                self.link_was_down = false;
            }
            AlertOutcome::Rejected(status) => {
                log::error!("DISTRESS CALL FAILED: push endpoint answered {status}");
                self.alert_failed();
            }
            AlertOutcome::TransportError => {
                log::error!("DISTRESS CALL FAILED: could not reach the push endpoint");
                self.alert_failed();
            }
        }

        Flow::Continue
    }

    fn alert_failed(&mut self) {
        self.state = LoopState::AlertFailed;
        self.signaler.set(Pattern::fast_pulse());
        // Treated like a lost link: the next tick warms up and re-checks.
        self.link_was_down = true;
    }

    /// Hold for `duration` while staying receptive to shutdown. Stale switch
    /// presses delivered here are dropped: the monitor is disarmed whenever
    /// the loop is holding.
    fn pause(&mut self, duration: Duration) -> Flow {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Flow::Continue;
            }
            match self.events_rx.recv_timeout(remaining) {
                Ok(ControlEvent::SwitchPressed) => {
                    log::debug!("Ignoring switch press: monitor is disarmed");
                }
                Ok(ControlEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    return Flow::Shutdown;
                }
                Err(RecvTimeoutError::Timeout) => return Flow::Continue,
            }
        }
    }

    /// Ordered teardown: no more interrupts, then no more blinking; the
    /// pins themselves go back to the hardware when their owners drop.
    fn shutdown(&mut self) {
        log::info!("Cleaning up...");
        if let Err(e) = self.monitor.disarm() {
            log::error!("Failed to disarm during shutdown: {e:#}");
        }
        self.signaler.stop();
        log::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{LivenessProbe, WifiStatus};
    use crate::gpio::{LedOutput, SwitchInput};
    use anyhow::Result;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::thread;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn record(journal: &Journal, entry: impl Into<String>) {
        journal.lock().unwrap().push(entry.into());
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    /// Records the last write so scenario E can assert the LED ends off.
    #[derive(Clone, Default)]
    struct RecordingLed {
        last_write: Arc<Mutex<Option<bool>>>,
    }

    impl LedOutput for RecordingLed {
        fn write(&mut self, on: bool) {
            *self.last_write.lock().unwrap() = Some(on);
        }

        fn set_duty(&mut self, _duty: u8) {}
    }

    /// Fake switch backend; stores the callback so tests can press it.
    #[derive(Clone)]
    struct FakeSwitch {
        callback: Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>,
        journal: Journal,
    }

    impl FakeSwitch {
        fn new(journal: Journal) -> Self {
            Self {
                callback: Arc::new(Mutex::new(None)),
                journal,
            }
        }

        /// Simulate a debounced falling edge.
        fn press(&self) {
            let mut taken = self.callback.lock().unwrap().take();
            if let Some(cb) = taken.as_mut() {
                cb();
            }
            if let Some(cb) = taken {
                let mut slot = self.callback.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
        }
    }

    impl SwitchInput for FakeSwitch {
        fn subscribe(
            &mut self,
            _debounce: Duration,
            callback: Box<dyn FnMut() + Send>,
        ) -> Result<()> {
            *self.callback.lock().unwrap() = Some(callback);
            record(&self.journal, "arm");
            Ok(())
        }

        fn unsubscribe(&mut self) -> Result<()> {
            *self.callback.lock().unwrap() = None;
            record(&self.journal, "disarm");
            Ok(())
        }
    }

    struct FixedWifi;

    impl WifiStatus for FixedWifi {
        fn current_ssid(&self) -> Option<String> {
            Some("test-net".to_string())
        }
    }

    /// Answers from a script; false once the script runs out.
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        journal: Journal,
        call_times: Arc<Mutex<Vec<Instant>>>,
    }

    impl LivenessProbe for ScriptedProbe {
        fn ping(&self, _host: &str) -> bool {
            self.call_times.lock().unwrap().push(Instant::now());
            let answer = self.script.lock().unwrap().pop_front().unwrap_or(false);
            record(&self.journal, if answer { "check:ok" } else { "check:fail" });
            answer
        }
    }

    struct ScriptedTransmitter {
        outcome: AlertOutcome,
        journal: Journal,
    }

    impl AlertTransmit for ScriptedTransmitter {
        fn send_alert(&self) -> AlertOutcome {
            record(&self.journal, "transmit");
            self.outcome
        }
    }

    struct Harness {
        journal: Journal,
        switch: FakeSwitch,
        signaler: Arc<Signaler>,
        led: RecordingLed,
        tx: SyncSender<ControlEvent>,
        probe_times: Arc<Mutex<Vec<Instant>>>,
        handle: thread::JoinHandle<Controller>,
    }

    impl Harness {
        fn start(probe_script: Vec<bool>, outcome: AlertOutcome, timings: LoopTimings) -> Self {
            let journal: Journal = Arc::new(Mutex::new(Vec::new()));
            let led = RecordingLed::default();
            let switch = FakeSwitch::new(Arc::clone(&journal));
            let probe_times = Arc::new(Mutex::new(Vec::new()));

            let signaler = Arc::new(Signaler::new(Box::new(led.clone())));
            let monitor =
                SwitchMonitor::new(Box::new(switch.clone()), Duration::from_millis(1));
            let checker = ConnectivityChecker::new(
                Box::new(FixedWifi),
                Box::new(ScriptedProbe {
                    script: Mutex::new(probe_script.into()),
                    journal: Arc::clone(&journal),
                    call_times: Arc::clone(&probe_times),
                }),
                "fcm.googleapis.com",
            );
            let transmitter = Box::new(ScriptedTransmitter {
                outcome,
                journal: Arc::clone(&journal),
            });

            let mut controller = Controller::new(
                Arc::clone(&signaler),
                monitor,
                checker,
                transmitter,
                timings,
                Pattern::breathing(4, Duration::from_millis(2)),
            );
            let tx = controller.event_sender();
            let handle = thread::spawn(move || {
                controller.run();
                controller
            });

            Self {
                journal,
                switch,
                signaler,
                led,
                tx,
                probe_times,
                handle,
            }
        }

        fn wait_until(&self, cond: impl Fn(&[String]) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if cond(&entries(&self.journal)) {
                    return;
                }
                thread::sleep(Duration::from_millis(5));
            }
            panic!("timed out waiting; journal = {:?}", entries(&self.journal));
        }

        fn shutdown(self) -> (Controller, Vec<String>) {
            let _ = self.tx.try_send(ControlEvent::Shutdown);
            let controller = self.handle.join().expect("controller thread panicked");
            let journal = entries(&self.journal);
            (controller, journal)
        }
    }

    fn fast_timings() -> LoopTimings {
        LoopTimings {
            poll_interval: Duration::from_millis(40),
            warmup: Duration::from_millis(1),
            cooldown: Duration::from_millis(30),
        }
    }

    /// One tick per minute: scenarios that must not see a second tick.
    fn single_tick_timings() -> LoopTimings {
        LoopTimings {
            poll_interval: Duration::from_secs(60),
            warmup: Duration::from_millis(1),
            cooldown: Duration::from_millis(30),
        }
    }

    fn count(journal: &[String], entry: &str) -> usize {
        journal.iter().filter(|e| *e == entry).count()
    }

    #[test]
    fn test_scenario_two_successes_arm_exactly_once() {
        let harness = Harness::start(vec![true, true], AlertOutcome::Delivered, fast_timings());
        harness.wait_until(|j| count(j, "check:ok") >= 2);
        let (controller, journal) = harness.shutdown();

        assert_eq!(controller.state(), LoopState::Connected);
        assert_eq!(count(&journal, "arm"), 1, "no re-arm on the second success");
    }

    #[test]
    fn test_scenario_fail_then_success_reconnects_after_warmup() {
        let timings = LoopTimings {
            poll_interval: Duration::from_millis(40),
            warmup: Duration::from_millis(50),
            cooldown: Duration::from_millis(30),
        };
        let started = Instant::now();
        let harness = Harness::start(vec![false, true], AlertOutcome::Delivered, timings);
        harness.wait_until(|j| count(j, "check:ok") >= 1 && count(j, "arm") >= 1);
        let probe_times = Arc::clone(&harness.probe_times);
        let (controller, journal) = harness.shutdown();

        assert_eq!(controller.state(), LoopState::Connected);

        // Disconnected -> Retrying -> Connected: the failed check comes
        // first, the monitor arms only after the success.
        let fail_at = journal.iter().position(|e| e == "check:fail").unwrap();
        let ok_at = journal.iter().position(|e| e == "check:ok").unwrap();
        let arm_at = journal.iter().position(|e| e == "arm").unwrap();
        assert!(fail_at < ok_at && ok_at < arm_at);

        // The warmup hold ran before the very first probe.
        let first_probe = *probe_times.lock().unwrap().first().expect("never probed");
        assert!(
            first_probe.duration_since(started) >= Duration::from_millis(50),
            "connectivity was probed before the warmup elapsed"
        );
    }

    #[test]
    fn test_scenario_delivered_alert_breathes_then_rearms() {
        let harness = Harness::start(vec![true], AlertOutcome::Delivered, single_tick_timings());
        harness.wait_until(|j| count(j, "arm") >= 1);

        harness.switch.press();
        harness.wait_until(|j| count(j, "arm") >= 2);
        let (controller, journal) = harness.shutdown();

        assert_eq!(controller.state(), LoopState::Connected);
        // Full lifecycle: connect, press, transmit, cooldown, re-arm, and
        // the shutdown disarm at the very end.
        assert_eq!(
            journal,
            vec!["check:ok", "arm", "disarm", "transmit", "arm", "disarm"]
        );
    }

    #[test]
    fn test_scenario_rejected_alert_stays_disarmed() {
        let harness = Harness::start(
            vec![true],
            AlertOutcome::Rejected(500),
            single_tick_timings(),
        );
        harness.wait_until(|j| count(j, "arm") >= 1);

        harness.switch.press();
        harness.wait_until(|j| count(j, "transmit") >= 1);

        // The alarm pattern comes up and nothing re-arms.
        let deadline = Instant::now() + Duration::from_secs(5);
        while harness.signaler.current_pattern() != Some(Pattern::fast_pulse()) {
            assert!(Instant::now() < deadline, "alarm pattern never shown");
            thread::sleep(Duration::from_millis(5));
        }

        let (controller, journal) = harness.shutdown();
        assert_eq!(controller.state(), LoopState::AlertFailed);
        // Disarmed since the press; the shutdown disarm was a no-op.
        assert_eq!(journal, vec!["check:ok", "arm", "disarm", "transmit"]);
    }

    #[test]
    fn test_scenario_shutdown_during_breathing_stops_pattern_led_off() {
        let timings = LoopTimings {
            poll_interval: Duration::from_secs(60),
            warmup: Duration::from_millis(1),
            cooldown: Duration::from_secs(60),
        };
        let harness = Harness::start(vec![true], AlertOutcome::Delivered, timings);
        harness.wait_until(|j| count(j, "arm") >= 1);

        harness.switch.press();
        harness.wait_until(|j| count(j, "transmit") >= 1);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !harness.signaler.is_running() {
            assert!(Instant::now() < deadline, "breathing pattern never started");
            thread::sleep(Duration::from_millis(5));
        }

        let led = harness.led.clone();
        let signaler = Arc::clone(&harness.signaler);
        let (controller, _) = harness.shutdown();

        assert_eq!(controller.state(), LoopState::AlertSuccess);
        assert!(!signaler.is_running(), "pattern thread survived shutdown");
        assert_eq!(signaler.current_pattern(), None);
        assert_eq!(*led.last_write.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_stale_press_while_disarmed_is_ignored() {
        let harness = Harness::start(vec![false], AlertOutcome::Delivered, fast_timings());
        harness.wait_until(|j| count(j, "check:fail") >= 1);

        // A stale event queued while nothing is armed.
        harness.tx.try_send(ControlEvent::SwitchPressed).unwrap();
        thread::sleep(Duration::from_millis(50));

        let (controller, journal) = harness.shutdown();
        assert_eq!(count(&journal, "transmit"), 0);
        assert_ne!(controller.state(), LoopState::AlertInFlight);
    }

    #[test]
    fn test_timings_from_config_use_seconds() {
        let config = Config::default();
        let timings = LoopTimings::from(&config);
        assert_eq!(timings.poll_interval, Duration::from_secs(120));
        assert_eq!(timings.warmup, Duration::from_secs(3));
        assert_eq!(timings.cooldown, Duration::from_secs(20));
    }
}
