use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topics;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("wifi_ssid cannot be empty")]
    MissingSsid,
    #[error("wifi_ssid must be at most 32 bytes")]
    SsidTooLong,
    #[error("wifi_pass must be at most 64 bytes")]
    PassphraseTooLong,
    #[error("mqtt_host cannot be empty")]
    MissingBrokerHost,
    #[error("mqtt_port must be between 1 and 65535")]
    InvalidBrokerPort,
    #[error("device_id cannot be empty or contain `+`, `#` or `/`")]
    InvalidTopic,
}

/// Credentials handed to the wireless transport on every association attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id: "mqtt-button".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn credentials(&self) -> WifiCredentials {
        WifiCredentials {
            ssid: self.wifi_ssid.clone(),
            passphrase: self.wifi_pass.clone(),
        }
    }

    pub fn broker_url(&self) -> String {
        format!("mqtt://{}:{}", self.mqtt_host, self.mqtt_port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ssid = self.wifi_ssid.trim();
        if ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        if ssid.len() > 32 {
            return Err(ConfigError::SsidTooLong);
        }
        if self.wifi_pass.len() > 64 {
            return Err(ConfigError::PassphraseTooLong);
        }
        if self.mqtt_host.trim().is_empty() {
            return Err(ConfigError::MissingBrokerHost);
        }
        if self.mqtt_port == 0 {
            return Err(ConfigError::InvalidBrokerPort);
        }
        Ok(())
    }
}

/// Polling budgets of the connectivity loop. A wait lasts
/// `poll_interval_ms * attempts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    pub poll_interval_ms: u64,
    pub association_attempts: u32,
    pub session_attempts: u32,
    pub steady_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            association_attempts: 300,
            session_attempts: 30,
            steady_interval_ms: 40,
        }
    }
}

impl ConnectivityConfig {
    pub fn association_budget_ms(&self) -> u64 {
        self.poll_interval_ms.saturating_mul(u64::from(self.association_attempts))
    }

    pub fn session_budget_ms(&self) -> u64 {
        self.poll_interval_ms.saturating_mul(u64::from(self.session_attempts))
    }

    pub fn sanitize(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.clamp(100, 10_000);
        self.association_attempts = self.association_attempts.clamp(1, 3_600);
        self.session_attempts = self.session_attempts.clamp(1, 600);
        self.steady_interval_ms = self.steady_interval_ms.clamp(10, 1_000);
    }
}

const MAX_STABLE_SAMPLES: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub pin: i32,
    /// Line level read while the button is not pressed.
    pub released_level: bool,
    pub sample_interval_ms: u64,
    pub stable_samples: u8,
    pub device_id: String,
    pub payload: String,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: 5,
            released_level: false,
            sample_interval_ms: 20,
            stable_samples: 3,
            device_id: "button-1".to_string(),
            payload: "pressed".to_string(),
        }
    }
}

impl ButtonConfig {
    pub fn topic(&self) -> String {
        topics::button_event_topic(&self.device_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let device_id = self.device_id.trim();
        if device_id.is_empty() || device_id.contains(['+', '#', '/']) {
            return Err(ConfigError::InvalidTopic);
        }
        Ok(())
    }

    pub fn sanitize(&mut self) {
        if self.pin < 0 {
            self.pin = 5;
        }
        self.sample_interval_ms = self.sample_interval_ms.clamp(5, 500);
        self.stable_samples = self.stable_samples.clamp(1, MAX_STABLE_SAMPLES);
    }

    /// Shortest time a debounced level can last: a change needs
    /// `stable_samples` agreeing samples before the next one is accepted.
    pub fn min_hold_ms(&self) -> u64 {
        self.sample_interval_ms.saturating_mul(u64::from(self.stable_samples))
    }

    /// Stretches debouncing until every debounced level outlives `poll_ms`,
    /// so a poller running at that period sees each press and each release.
    fn hold_longer_than(&mut self, poll_ms: u64) {
        if self.min_hold_ms() > poll_ms {
            return;
        }
        let needed = poll_ms / self.sample_interval_ms + 1;
        match u8::try_from(needed) {
            Ok(samples) if samples <= MAX_STABLE_SAMPLES => self.stable_samples = samples,
            _ => {
                self.stable_samples = MAX_STABLE_SAMPLES;
                self.sample_interval_ms = poll_ms / u64::from(MAX_STABLE_SAMPLES) + 1;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Door-open alarm LED.
    pub status_pin: i32,
    /// Publish acknowledgement LED.
    pub pulse_pin: i32,
    pub failure_pin: i32,
    pub failure_active_low: bool,
    pub pulse_ms: u64,
    /// How long the button may stay released before the alarm starts.
    pub alarm_after_ms: u64,
    /// Half period of the alarm blink.
    pub alarm_blink_ms: u64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            status_pin: 4,
            pulse_pin: 2,
            failure_pin: 21,
            failure_active_low: true,
            pulse_ms: 200,
            alarm_after_ms: 30_000,
            alarm_blink_ms: 200,
        }
    }
}

impl IndicatorConfig {
    pub fn sanitize(&mut self) {
        if self.status_pin < 0 {
            self.status_pin = 4;
        }
        if self.pulse_pin < 0 {
            self.pulse_pin = 2;
        }
        if self.failure_pin < 0 {
            self.failure_pin = 21;
        }
        self.pulse_ms = self.pulse_ms.clamp(20, 2_000);
        self.alarm_blink_ms = self.alarm_blink_ms.clamp(50, 2_000);
        self.alarm_after_ms = self.alarm_after_ms.clamp(1_000, 3_600_000);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
}

impl RuntimeConfig {
    /// Parses a stored configuration and clamps it into the supported ranges.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut runtime: Self = serde_json::from_str(json)?;
        runtime.sanitize();
        Ok(runtime)
    }

    pub fn sanitize(&mut self) {
        self.connectivity.sanitize();
        self.button.sanitize();
        self.button.hold_longer_than(self.connectivity.steady_interval_ms);
        self.indicator.sanitize();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.button.validate()
    }
}
