//! Pendant - medical alert button daemon.
//!
//! Watches a physical switch on a Raspberry Pi-class board, confirms
//! network reachability on a fixed cadence, signals status through a single
//! LED, and transmits a push-notification alert when the switch is pressed.
//!
//! # Architecture
//!
//! One control-loop thread owns every state transition. Everything else is
//! a producer into its bounded event channel or a capability it calls:
//!
//! - **Controller** - the state machine; polls connectivity, reacts to
//!   switch presses, sequences the other components
//! - **Signaler** - mutually-exclusive LED blink patterns on a background
//!   thread with cooperative cancellation
//! - **SwitchMonitor** - arms/disarms the debounced falling-edge interrupt
//! - **ConnectivityChecker** - SSID + single-ping reachability check
//! - **AlertTransmitter** - one bounded HTTPS POST per alert
//!
//! # Modules
//!
//! - [`controller`] - control loop and event/state types
//! - [`signaler`] - LED patterns
//! - [`gpio`] - hardware capability traits + Raspberry Pi backend
//! - [`config`] - configuration loading/saving

// Library modules
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod controller;
pub mod gpio;
pub mod monitor;
pub mod signaler;
pub mod transmitter;

// Re-export commonly used types
pub use config::Config;
pub use connectivity::ConnectivityChecker;
pub use controller::{ControlEvent, Controller, LoopState, LoopTimings};
pub use monitor::SwitchMonitor;
pub use signaler::{Pattern, Signaler};
pub use transmitter::{AlertOutcome, AlertTransmitter};
