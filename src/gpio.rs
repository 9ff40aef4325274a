//! GPIO capability traits and the Raspberry Pi backend.
//!
//! The signaler and monitor consume hardware through [`LedOutput`] and
//! [`SwitchInput`] so tests can substitute recording fakes. [`init`] opens
//! the real backend; failure there is fatal — without the pins there is
//! nothing for the daemon to do.

use std::time::Duration;

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};

use crate::constants::{DUTY_MAX, PWM_FREQUENCY_HZ};

/// Write access to the status LED.
///
/// Writes are infallible by contract: anything that can fail should fail at
/// construction time, not while a pattern is blinking.
pub trait LedOutput: Send {
    /// Drive the pin fully on or off, leaving any PWM mode.
    fn write(&mut self, on: bool);

    /// Drive the pin at a duty cycle between 0 (dark) and [`DUTY_MAX`] (full).
    fn set_duty(&mut self, duty: u8);
}

/// Edge-interrupt access to the alert switch.
pub trait SwitchInput: Send {
    /// Register a debounced falling-edge callback.
    ///
    /// At most one registration exists at a time; the monitor guarantees
    /// `unsubscribe` runs before any re-subscribe. The callback is invoked
    /// from the backend's interrupt-servicing thread and must not block.
    fn subscribe(
        &mut self,
        debounce: Duration,
        callback: Box<dyn FnMut() + Send>,
    ) -> Result<()>;

    /// Cancel the current registration, if any.
    fn unsubscribe(&mut self) -> Result<()>;
}

/// Status LED on a Raspberry Pi GPIO pin. Fades use software PWM.
pub struct PiLed {
    pin: OutputPin,
}

impl std::fmt::Debug for PiLed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiLed").field("pin", &self.pin.pin()).finish()
    }
}

impl LedOutput for PiLed {
    fn write(&mut self, on: bool) {
        if let Err(e) = self.pin.clear_pwm() {
            log::debug!("clear_pwm on LED pin failed: {e}");
        }
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    fn set_duty(&mut self, duty: u8) {
        let duty_cycle = f64::from(duty) / f64::from(DUTY_MAX);
        if let Err(e) = self.pin.set_pwm_frequency(PWM_FREQUENCY_HZ, duty_cycle) {
            log::debug!("PWM write on LED pin failed: {e}");
        }
    }
}

/// Alert switch on a Raspberry Pi GPIO pin.
///
/// The pin is pulled up internally; pressing the button connects it to
/// ground, so a press is a falling edge.
pub struct PiSwitch {
    pin: InputPin,
}

impl std::fmt::Debug for PiSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiSwitch").field("pin", &self.pin.pin()).finish()
    }
}

impl SwitchInput for PiSwitch {
    fn subscribe(
        &mut self,
        debounce: Duration,
        mut callback: Box<dyn FnMut() + Send>,
    ) -> Result<()> {
        self.pin
            .set_async_interrupt(Trigger::FallingEdge, Some(debounce), move |_event| {
                callback();
            })
            .context("failed to register switch interrupt")
    }

    fn unsubscribe(&mut self) -> Result<()> {
        self.pin
            .clear_async_interrupt()
            .context("failed to cancel switch interrupt")
    }
}

/// Open the GPIO backend and claim both pins.
///
/// # Errors
///
/// Any failure here (backend unreachable, pin already claimed) is a fatal
/// startup error; the caller logs it and exits.
pub fn init(led_pin: u8, switch_pin: u8) -> Result<(PiLed, PiSwitch)> {
    let gpio = Gpio::new().context("GPIO backend could not be initialized")?;

    let led = gpio
        .get(led_pin)
        .with_context(|| format!("failed to claim LED pin {led_pin}"))?
        .into_output_low();

    let switch = gpio
        .get(switch_pin)
        .with_context(|| format!("failed to claim switch pin {switch_pin}"))?
        .into_input_pullup();

    log::info!("GPIO init successful (LED pin {led_pin}, switch pin {switch_pin})");

    Ok((PiLed { pin: led }, PiSwitch { pin: switch }))
}
