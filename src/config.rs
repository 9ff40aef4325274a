//! Configuration loading and persistence.
//!
//! Handles reading and writing the pendant configuration file. The FCM
//! server key is never serialized back to disk; it comes from the config
//! file or the `PENDANT_SERVER_KEY` environment variable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

/// Configuration for the pendant daemon.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// BCM pin number driving the status LED.
    pub led_pin: u8,
    /// BCM pin number wired to the alert switch (closes to ground).
    pub switch_pin: u8,
    /// Interval in seconds between connectivity checks.
    pub poll_interval: u64,
    /// Push endpoint hostname; also the target of the liveness probe.
    pub push_host: String,
    /// FCM server key - NOT serialized back to disk.
    #[serde(default, skip_serializing)]
    pub server_key: String,
    /// Topic the alarm message is addressed to.
    pub topic: String,
    /// Debounce window for the switch, in milliseconds.
    pub debounce_ms: u64,
    /// Timeout in seconds for the single liveness ping.
    pub ping_timeout: u64,
    /// Seconds of slow-pulse warmup before re-checking a lost connection.
    pub warmup: u64,
    /// Seconds of breathing "light show" after a delivered alert.
    pub cooldown: u64,
    /// Duty-cycle increment per breathing fade step (out of 255).
    pub breathing_step: u8,
    /// Delay in milliseconds between breathing fade steps.
    pub breathing_step_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            led_pin: 3,
            switch_pin: 11,
            poll_interval: 120,
            push_host: "fcm.googleapis.com".to_string(),
            server_key: String::new(),
            topic: "medical_alert".to_string(),
            debounce_ms: 1,
            ping_timeout: 2,
            warmup: 3,
            cooldown: 20,
            breathing_step: 4,
            breathing_step_delay_ms: 10,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): a throwaway dir under the system tmp
    /// 2. `PENDANT_CONFIG_DIR` env var: explicit override
    /// 3. Default: platform config dir (e.g. `~/.config/pendant`)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                std::env::temp_dir().join("pendant-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("PENDANT_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("pendant")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PENDANT_PUSH_HOST") {
            self.push_host = host;
        }

        // Server key from env var (keeps it out of the config file entirely)
        if let Ok(key) = std::env::var("PENDANT_SERVER_KEY") {
            self.server_key = key;
        }

        if let Ok(topic) = std::env::var("PENDANT_TOPIC") {
            self.topic = topic;
        }

        if let Ok(poll_interval) = std::env::var("PENDANT_POLL_INTERVAL") {
            if let Ok(interval) = poll_interval.parse::<u64>() {
                self.poll_interval = interval;
            }
        }

        if let Ok(led_pin) = std::env::var("PENDANT_LED_PIN") {
            if let Ok(pin) = led_pin.parse::<u8>() {
                self.led_pin = pin;
            }
        }

        if let Ok(switch_pin) = std::env::var("PENDANT_SWITCH_PIN") {
            if let Ok(pin) = switch_pin.parse::<u8>() {
                self.switch_pin = pin;
            }
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the server key is NOT written (supply it via file edit or env).
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Check whether a push server key has been supplied.
    pub fn has_server_key(&self) -> bool {
        !self.server_key.is_empty()
    }
}
