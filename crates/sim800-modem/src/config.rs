//! Session configuration.
//!
//! A [`ModemConfig`] is an immutable record handed to the session at
//! construction. It is usually loaded from YAML; every field has a default
//! so a file only names what it changes:
//!
//! ```yaml
//! serial_port: /dev/ttyS0
//! apn: internet
//! reset_pin: ~
//! command_pause: 0.25
//! policies:
//!   network_attach: retry(3)
//! ```
//!
//! Durations are written as fractional seconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::FailurePolicy;
use crate::error::{Sim800Error, Sim800Result};

/// Serde helpers for durations written as fractional seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Failure policy per command family.
///
/// Feature chains look their step policies up here instead of hard-coding
/// them, so a deployment can e.g. retry bearer setup more aggressively on a
/// flaky network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CommandPolicies {
    /// `AT+CGATT=1`, `AT+CIICR`: registering with the packet network.
    pub network_attach: FailurePolicy,
    /// `AT+SAPBR=1,1`: opening the HTTP bearer.
    pub bearer_open: FailurePolicy,
    /// Optional status queries such as `AT+SAPBR=2,1`.
    pub status_query: FailurePolicy,
    /// Mode and parameter setup (`AT+CMGF`, `AT+HTTPPARA`, ...).
    pub session_setup: FailurePolicy,
    /// Commands that move user data (`AT+HTTPACTION`, `AT+CIPSEND`, ...).
    pub data_transfer: FailurePolicy,
}

impl Default for CommandPolicies {
    fn default() -> Self {
        CommandPolicies {
            network_attach: FailurePolicy::Retry(2),
            bearer_open: FailurePolicy::Retry(1),
            status_query: FailurePolicy::Ignore,
            session_setup: FailurePolicy::Abort,
            data_transfer: FailurePolicy::Abort,
        }
    }
}

/// Configuration record consumed by [`crate::Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModemConfig {
    /// Serial device path, or `tcp://host:port` for a serial-over-TCP bridge.
    pub serial_port: String,
    /// Baud rate of the serial line.
    pub baud_rate: u32,
    /// Default timeout for a single command.
    #[serde(with = "seconds")]
    pub read_timeout: Duration,
    /// How long boot may poll before giving up.
    #[serde(with = "seconds")]
    pub boot_wait_time: Duration,
    /// Delay between readiness polls.
    #[serde(with = "seconds")]
    pub boot_poll_interval: Duration,
    /// Minimum pause between the end of one exchange and the next write.
    #[serde(with = "seconds")]
    pub command_pause: Duration,
    /// Timeout for `AT+HTTPACTION` to report a status.
    #[serde(with = "seconds")]
    pub http_request_timeout: Duration,
    /// Upload window for `AT+HTTPDATA` bodies.
    #[serde(with = "seconds")]
    pub http_post_upload_timeout: Duration,
    /// Timeout for `AT+CIICR` and `AT+CIPSTART`.
    #[serde(with = "seconds")]
    pub tcp_connect_timeout: Duration,
    /// Timeout for an SMS submission to be acknowledged.
    #[serde(with = "seconds")]
    pub sms_send_timeout: Duration,
    /// Minimum interval between outgoing SMS messages.
    #[serde(with = "seconds")]
    pub sms_throttle: Duration,
    /// Carrier access point name.
    pub apn: String,
    /// GPIO driving the modem reset line; `None` selects soft-reboot mode.
    pub reset_pin: Option<u32>,
    /// How long the reset line is held.
    #[serde(with = "seconds")]
    pub reset_pulse: Duration,
    /// Unsolicited messages that must be seen before boot reports ready.
    pub boot_messages: Vec<String>,
    /// Failure policies per command family.
    pub policies: CommandPolicies,
}

impl Default for ModemConfig {
    fn default() -> Self {
        ModemConfig {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(10),
            boot_wait_time: Duration::from_secs(180),
            boot_poll_interval: Duration::from_millis(100),
            command_pause: Duration::from_millis(500),
            http_request_timeout: Duration::from_secs(60),
            http_post_upload_timeout: Duration::from_secs(60),
            tcp_connect_timeout: Duration::from_secs(20),
            sms_send_timeout: Duration::from_secs(60),
            sms_throttle: Duration::from_secs(600),
            apn: "EE".to_string(),
            reset_pin: Some(4),
            reset_pulse: Duration::from_secs(1),
            boot_messages: Vec::new(),
            policies: CommandPolicies::default(),
        }
    }
}

impl ModemConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Sim800Result<Self> {
        let config: ModemConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Sim800Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Sim800Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Render as YAML.
    pub fn to_yaml(&self) -> Sim800Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check that the values can drive a session.
    pub fn validate(&self) -> Sim800Result<()> {
        if self.serial_port.trim().is_empty() {
            return Err(Sim800Error::Config("serial_port is empty".into()));
        }
        if self.apn.trim().is_empty() {
            return Err(Sim800Error::Config("apn is empty".into()));
        }
        if self.apn.chars().any(|c| c == '"' || c.is_control()) {
            return Err(Sim800Error::Config(format!(
                "apn contains a quote or control character: {:?}",
                self.apn
            )));
        }
        if self.baud_rate == 0 {
            return Err(Sim800Error::Config("baud_rate must be positive".into()));
        }
        let timeouts = [
            ("read_timeout", self.read_timeout),
            ("boot_wait_time", self.boot_wait_time),
            ("boot_poll_interval", self.boot_poll_interval),
            ("http_request_timeout", self.http_request_timeout),
            ("http_post_upload_timeout", self.http_post_upload_timeout),
            ("tcp_connect_timeout", self.tcp_connect_timeout),
            ("sms_send_timeout", self.sms_send_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Sim800Error::Config(format!("{} must be positive", name)));
            }
        }
        if self.reset_pin.is_some() && self.reset_pulse.is_zero() {
            return Err(Sim800Error::Config(
                "reset_pulse must be positive when reset_pin is set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ModemConfig::default();
        assert_eq!(config.serial_port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.boot_wait_time, Duration::from_secs(180));
        assert_eq!(config.reset_pin, Some(4));
        assert_eq!(config.policies.network_attach, FailurePolicy::Retry(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ModemConfig::from_yaml_str(
            "apn: internet\nreset_pin: ~\ncommand_pause: 0.25\npolicies:\n  bearer_open: ignore\n",
        )
        .unwrap();
        assert_eq!(config.apn, "internet");
        assert_eq!(config.reset_pin, None);
        assert_eq!(config.command_pause, Duration::from_millis(250));
        assert_eq!(config.policies.bearer_open, FailurePolicy::Ignore);
        assert_eq!(config.policies.network_attach, FailurePolicy::Retry(2));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ModemConfig::from_yaml_str("serial_prot: /dev/ttyS0\n").unwrap_err();
        assert!(matches!(err, Sim800Error::ConfigParse(_)));
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(ModemConfig::from_yaml_str("read_timeout: -1\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_bad_apn() {
        let err = ModemConfig::from_yaml_str("read_timeout: 0\n").unwrap_err();
        assert!(err.to_string().contains("read_timeout"));

        let err = ModemConfig::from_yaml_str("apn: 'a\"b'\n").unwrap_err();
        assert!(matches!(err, Sim800Error::Config(_)));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = ModemConfig::default();
        config.boot_messages = vec!["SMS Ready".into()];
        config.policies.status_query = FailurePolicy::Retry(4);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("retry(4)"));
        assert_eq!(ModemConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
