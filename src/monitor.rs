//! Alert switch monitoring.
//!
//! Arms and disarms the debounced falling-edge interrupt on the alert
//! switch. The hardware callback does exactly one bounded thing: push a
//! [`ControlEvent::SwitchPressed`] into the control loop's channel with
//! `try_send`, so it never blocks the interrupt-servicing thread and never
//! touches controller state directly.

use std::sync::mpsc::SyncSender;
use std::time::Duration;

use anyhow::Result;

use crate::controller::ControlEvent;
use crate::gpio::SwitchInput;

/// Arms/disarms the hardware interrupt for the alert switch.
///
/// Both operations are idempotent: arming while armed and disarming while
/// disarmed are no-ops, so there is no duplicate-registration leak.
pub struct SwitchMonitor {
    input: Box<dyn SwitchInput>,
    debounce: Duration,
    armed: bool,
}

impl std::fmt::Debug for SwitchMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchMonitor")
            .field("armed", &self.armed)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl SwitchMonitor {
    pub fn new(input: Box<dyn SwitchInput>, debounce: Duration) -> Self {
        Self {
            input,
            debounce,
            armed: false,
        }
    }

    /// Whether the interrupt callback is currently registered.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Register the falling-edge callback. No-op when already armed.
    pub fn arm(&mut self, events: SyncSender<ControlEvent>) -> Result<()> {
        if self.armed {
            return Ok(());
        }

        self.input.subscribe(
            self.debounce,
            Box::new(move || {
                if events.try_send(ControlEvent::SwitchPressed).is_err() {
                    log::warn!("Switch press dropped: control loop is busy");
                }
            }),
        )?;

        self.armed = true;
        log::info!("Alarm callback is active");
        Ok(())
    }

    /// Cancel the registration. No-op when already disarmed.
    pub fn disarm(&mut self) -> Result<()> {
        if !self.armed {
            return Ok(());
        }

        self.input.unsubscribe()?;
        self.armed = false;
        log::info!("Alarm callback is deactivated");
        Ok(())
    }
}
