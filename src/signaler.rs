//! LED signaling with named blink patterns.
//!
//! At most one background pattern thread drives the LED at any instant.
//! [`Signaler::set`] and [`Signaler::stop`] are atomic swap-and-join
//! operations under a single lock: the previous run is cancelled and joined
//! (leaving the pin off) before the LED changes hands. Pattern threads sleep
//! on a condvar-backed [`CancelToken`] between sub-steps, so stopping never
//! polls and completes within one sub-step duration.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{
    BREATHING_PEAK_HOLD, BREATHING_TROUGH_HOLD, DUTY_MAX, FAST_PULSE_HALF_PERIOD,
    SLOW_PULSE_HALF_PERIOD,
};
use crate::gpio::LedOutput;

/// A named blink pattern with its timing baked in.
///
/// Timing is fixed once the pattern is selected for a run; changing it means
/// starting a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Steady on: connected and sleeping easy.
    SolidOn,
    /// Steady off.
    SolidOff,
    /// Slow on/off pulse shown while a connectivity re-check warms up.
    SlowPulse {
        /// Duration of each on and each off phase.
        half_period: Duration,
    },
    /// Fast on/off pulse: the "offline / alert failed" alarm pattern.
    FastPulse {
        /// Duration of each on and each off phase.
        half_period: Duration,
    },
    /// Duty-cycle fade up and back down, one attention-getting "sigh" per
    /// return trip.
    Breathing {
        /// Duty increment per fade step (out of 255).
        step: u8,
        /// Delay between fade steps.
        step_delay: Duration,
    },
}

impl Pattern {
    /// Slow pulse with the stock warmup timing.
    pub fn slow_pulse() -> Self {
        Self::SlowPulse {
            half_period: SLOW_PULSE_HALF_PERIOD,
        }
    }

    /// Fast pulse with the stock alarm timing.
    pub fn fast_pulse() -> Self {
        Self::FastPulse {
            half_period: FAST_PULSE_HALF_PERIOD,
        }
    }

    /// Breathing fade with the given step size and per-step delay.
    pub fn breathing(step: u8, step_delay: Duration) -> Self {
        Self::Breathing {
            step: step.max(1),
            step_delay,
        }
    }

    /// Whether this pattern needs a background thread at all.
    fn is_animated(self) -> bool {
        !matches!(self, Self::SolidOn | Self::SolidOff)
    }
}

/// Cooperative cancellation shared between a pattern thread and its owner.
///
/// Pattern threads sleep on the condvar between sub-steps; `cancel` flips
/// the flag and notifies, so stop latency is one sub-step at most.
struct CancelToken {
    cancelled: Mutex<bool>,
    cvar: Condvar,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().expect("cancel token mutex poisoned");
        *cancelled = true;
        self.cvar.notify_all();
    }

    /// Sleep for up to `timeout`, returning `true` if cancelled (possibly
    /// without sleeping at all).
    fn wait_for(&self, timeout: Duration) -> bool {
        let cancelled = self.cancelled.lock().expect("cancel token mutex poisoned");
        let (cancelled, _timed_out) = self
            .cvar
            .wait_timeout_while(cancelled, timeout, |cancelled| !*cancelled)
            .expect("cancel token mutex poisoned");
        *cancelled
    }
}

/// One active background signaling run.
///
/// Owns exclusive control of the LED for its lifetime and hands it back
/// through the join handle when cancelled.
struct SignalerHandle {
    token: Arc<CancelToken>,
    thread: JoinHandle<Box<dyn LedOutput>>,
}

/// The LED lives either here (idle, solid levels) or inside the active
/// pattern thread - never both.
struct Slot {
    led: Option<Box<dyn LedOutput>>,
    active: Option<SignalerHandle>,
    current: Option<Pattern>,
}

/// Drives the status LED. Exactly one pattern runs at a time, system-wide.
pub struct Signaler {
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for Signaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signaler")
            .field("current", &self.current_pattern())
            .finish_non_exhaustive()
    }
}

impl Signaler {
    /// Take ownership of the LED output.
    pub fn new(led: Box<dyn LedOutput>) -> Self {
        Self {
            slot: Mutex::new(Slot {
                led: Some(led),
                active: None,
                current: None,
            }),
        }
    }

    /// Stop whatever is running and show `pattern`.
    ///
    /// Solid levels are written inline; animated patterns get a fresh
    /// background thread that owns the LED until the next `set` or `stop`.
    /// The stop-then-start sequence is atomic: another caller blocks on the
    /// slot lock until the swap completes.
    pub fn set(&self, pattern: Pattern) {
        let mut slot = self.slot.lock().expect("signaler slot mutex poisoned");
        let mut led = Self::reclaim(&mut slot);

        if pattern.is_animated() {
            // Known-off state before the new run takes over.
            led.write(false);
            let token = Arc::new(CancelToken::new());
            let run_token = Arc::clone(&token);
            let thread = thread::spawn(move || {
                run_pattern(pattern, &mut *led, &run_token);
                // Known-off state before the LED changes hands again.
                led.write(false);
                led
            });
            slot.active = Some(SignalerHandle { token, thread });
        } else {
            led.write(matches!(pattern, Pattern::SolidOn));
            slot.led = Some(led);
        }
        slot.current = Some(pattern);
    }

    /// Stop any running pattern and leave the LED off.
    pub fn stop(&self) {
        let mut slot = self.slot.lock().expect("signaler slot mutex poisoned");
        let mut led = Self::reclaim(&mut slot);
        led.write(false);
        slot.led = Some(led);
        slot.current = None;
    }

    /// Whether a background pattern thread is currently running.
    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .expect("signaler slot mutex poisoned")
            .active
            .is_some()
    }

    /// The last pattern selected with [`set`](Self::set), if any.
    pub fn current_pattern(&self) -> Option<Pattern> {
        self.slot
            .lock()
            .expect("signaler slot mutex poisoned")
            .current
    }

    /// Cancel and join the active run, taking the LED back.
    ///
    /// Blocks until the pattern thread has observed the token and exited,
    /// which is bounded by one sub-step duration.
    fn reclaim(slot: &mut Slot) -> Box<dyn LedOutput> {
        if let Some(handle) = slot.active.take() {
            handle.token.cancel();
            handle.thread.join().expect("LED pattern thread panicked")
        } else {
            slot.led.take().expect("LED output missing from signaler slot")
        }
    }
}

impl Drop for Signaler {
    fn drop(&mut self) {
        // Last-resort join so a dropped signaler never leaks a blinking LED.
        if let Ok(mut slot) = self.slot.lock() {
            if slot.active.is_some() {
                let mut led = Self::reclaim(&mut slot);
                led.write(false);
                slot.led = Some(led);
            }
        }
    }
}

/// Body of a background pattern run. Checks the token between every
/// sub-step so cancellation never waits for a full cycle.
fn run_pattern(pattern: Pattern, led: &mut dyn LedOutput, token: &CancelToken) {
    log::debug!("LED pattern {pattern:?} starting");
    match pattern {
        Pattern::SolidOn | Pattern::SolidOff => {
            unreachable!("solid levels are written inline, not on a thread")
        }
        Pattern::SlowPulse { half_period } | Pattern::FastPulse { half_period } => loop {
            led.write(true);
            if token.wait_for(half_period) {
                break;
            }
            led.write(false);
            if token.wait_for(half_period) {
                break;
            }
        },
        Pattern::Breathing { step, step_delay } => breathe(led, step, step_delay, token),
    }
    log::debug!("LED pattern {pattern:?} exiting");
}

/// One fade-up / hold / fade-down / hold cycle per iteration until cancelled.
fn breathe(led: &mut dyn LedOutput, step: u8, step_delay: Duration, token: &CancelToken) {
    let step = usize::from(step.max(1));
    let top = usize::from(DUTY_MAX);
    loop {
        for duty in (0..=top).step_by(step) {
            led.set_duty(duty as u8);
            if token.wait_for(step_delay) {
                return;
            }
        }
        if token.wait_for(BREATHING_PEAK_HOLD) {
            return;
        }
        for duty in (0..=top).rev().step_by(step) {
            led.set_duty(duty as u8);
            if token.wait_for(step_delay) {
                return;
            }
        }
        if token.wait_for(BREATHING_TROUGH_HOLD) {
            return;
        }
    }
}
