//! Network reachability checks.
//!
//! A check is two questions asked in order: are we associated with a wifi
//! network at all, and does the push host answer a single ping? Both are
//! consumed as capabilities so the control loop can be tested without a
//! network; the real backends shell out to the system tools.

use std::process::{Command, Stdio};
use std::time::Duration;

/// Current wifi association.
pub trait WifiStatus: Send {
    /// SSID of the associated network, or `None` when unassociated.
    fn current_ssid(&self) -> Option<String>;
}

/// Single-shot liveness probe against a remote host.
pub trait LivenessProbe: Send {
    /// One echo request; `true` means the host answered within the timeout.
    fn ping(&self, host: &str) -> bool;
}

/// Reads the SSID with `iwgetid -r`.
#[derive(Debug)]
pub struct IwgetidWifi;

impl WifiStatus for IwgetidWifi {
    fn current_ssid(&self) -> Option<String> {
        let output = Command::new("iwgetid").arg("-r").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if ssid.is_empty() {
            None
        } else {
            Some(ssid)
        }
    }
}

/// One ICMP echo via the system `ping` binary.
#[derive(Debug)]
pub struct SystemPing {
    timeout: Duration,
}

impl SystemPing {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LivenessProbe for SystemPing {
    fn ping(&self, host: &str) -> bool {
        // `ping -W` takes whole seconds; never pass 0.
        let timeout_secs = self.timeout.as_secs().max(1).to_string();
        Command::new("ping")
            .args(["-c", "1", "-W", &timeout_secs, host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

/// Confirms the push endpoint is reachable over the current wifi link.
///
/// Runs synchronously on the caller's thread; the probe timeout bounds how
/// long a check can block.
pub struct ConnectivityChecker {
    wifi: Box<dyn WifiStatus>,
    probe: Box<dyn LivenessProbe>,
    host: String,
}

impl std::fmt::Debug for ConnectivityChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityChecker")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl ConnectivityChecker {
    pub fn new(
        wifi: Box<dyn WifiStatus>,
        probe: Box<dyn LivenessProbe>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            wifi,
            probe,
            host: host.into(),
        }
    }

    /// `true` when we are associated and the push host answers one ping.
    pub fn check(&self) -> bool {
        let Some(ssid) = self.wifi.current_ssid() else {
            log::error!("There is no wifi connection!");
            return false;
        };
        log::info!("Currently connected to: {ssid}");

        if self.probe.ping(&self.host) {
            true
        } else {
            log::error!("Ping to {} failed!", self.host);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedWifi(Option<&'static str>);

    impl WifiStatus for FixedWifi {
        fn current_ssid(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    struct CountingProbe {
        answer: bool,
        calls: Arc<AtomicUsize>,
    }

    impl LivenessProbe for CountingProbe {
        fn ping(&self, _host: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[test]
    fn test_no_ssid_is_unreachable_without_probing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let checker = ConnectivityChecker::new(
            Box::new(FixedWifi(None)),
            Box::new(CountingProbe {
                answer: true,
                calls: Arc::clone(&calls),
            }),
            "fcm.googleapis.com",
        );

        assert!(!checker.check());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "no ping without an SSID");
    }

    #[test]
    fn test_ssid_and_answered_ping_is_reachable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let checker = ConnectivityChecker::new(
            Box::new(FixedWifi(Some("home-net"))),
            Box::new(CountingProbe {
                answer: true,
                calls: Arc::clone(&calls),
            }),
            "fcm.googleapis.com",
        );

        assert!(checker.check());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unanswered_ping_is_unreachable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let checker = ConnectivityChecker::new(
            Box::new(FixedWifi(Some("home-net"))),
            Box::new(CountingProbe {
                answer: false,
                calls: Arc::clone(&calls),
            }),
            "fcm.googleapis.com",
        );

        assert!(!checker.check());
    }
}
