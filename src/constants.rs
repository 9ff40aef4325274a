//! Fixed timings and limits for the pendant daemon.
//!
//! Anything an operator may want to tune lives in [`crate::config::Config`];
//! this module holds the values that are part of the daemon's behavior
//! rather than its configuration, grouped by domain.

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for the push endpoint.
///
/// Applies to the whole alert transmission (connect, TLS, response).
/// 10 seconds is generous for a single small POST while still bounding
/// how long the control loop can be stuck in `AlertInFlight`.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// LED patterns
// ============================================================================

/// Half-period of the slow pulse shown while a connectivity re-check warms up.
pub const SLOW_PULSE_HALF_PERIOD: Duration = Duration::from_millis(700);

/// Half-period of the fast pulse: the "offline / alert failed" alarm pattern.
pub const FAST_PULSE_HALF_PERIOD: Duration = Duration::from_millis(100);

/// Hold at full brightness at the top of a breathing cycle.
pub const BREATHING_PEAK_HOLD: Duration = Duration::from_secs(1);

/// Hold in the dark at the bottom of a breathing cycle.
pub const BREATHING_TROUGH_HOLD: Duration = Duration::from_millis(300);

/// Software PWM frequency for the breathing fade.
///
/// Fast enough that the eye sees brightness, not flicker.
pub const PWM_FREQUENCY_HZ: f64 = 100.0;

/// Duty-cycle ceiling for [`crate::gpio::LedOutput::set_duty`].
pub const DUTY_MAX: u8 = 255;

// ============================================================================
// Control loop
// ============================================================================

/// Capacity of the control-event channel.
///
/// Producers (the switch callback, the signal watcher) `try_send` and drop
/// on overflow, so the bound only needs to cover a short burst while the
/// loop is mid-transmission.
pub const EVENT_CHANNEL_BOUND: usize = 16;
