//! Bridge configuration, read once at startup from a JSON file

use std::path::{Path, PathBuf};
use std::time::Duration;

use bledom_link::{BackoffPolicy, LinkConfig};
use serde::Deserialize;

use crate::command::{CommandError, LightCommand};
use crate::mqtt::{MqttSettings, Topics};
use crate::state::LightState;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory, set BLEDOM_HOME")]
    NoHome,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid initial_state: {0}")]
    InitialState(#[from] CommandError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// BLE address of the light, `AA:BB:CC:DD:EE:FF`
    pub device_address: String,
    pub mqtt_broker: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_username: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_frame_gap_ms")]
    pub frame_gap_ms: u64,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,
    /// Same schema as a bus command, applied on top of "off, white, 100%"
    #[serde(default)]
    pub initial_state: Option<serde_json::Value>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_base_topic() -> String {
    "bedframe/light".to_string()
}

fn default_client_id() -> String {
    "bledom-bridge".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_write_timeout_secs() -> u64 {
    5
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_frame_gap_ms() -> u64 {
    100
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_backoff_jitter() -> f64 {
    0.2
}

/// `$BLEDOM_HOME`, falling back to `~/.bledom`
pub fn bledom_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("BLEDOM_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".bledom"))
        .ok_or(ConfigError::NoHome)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(bledom_home()?.join(CONFIG_FILE))
}

impl Config {
    /// Read, parse and validate
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_mac_address(&self.device_address) {
            return Err(invalid(
                "device_address",
                format!("{:?} is not of the form AA:BB:CC:DD:EE:FF", self.device_address),
            ));
        }
        if self.mqtt_broker.trim().is_empty() {
            return Err(invalid("mqtt_broker", "must not be empty"));
        }
        if self.mqtt_port == 0 {
            return Err(invalid("mqtt_port", "must not be 0"));
        }
        if self.mqtt_password.is_some() && self.mqtt_username.is_none() {
            return Err(invalid("mqtt_password", "set without mqtt_username"));
        }
        if self.base_topic.trim_matches('/').is_empty() {
            return Err(invalid("base_topic", "must not be empty"));
        }
        if self.base_topic.contains(['+', '#']) {
            return Err(invalid("base_topic", "must not contain MQTT wildcards"));
        }
        if self.client_id.is_empty() {
            return Err(invalid("client_id", "must not be empty"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("connect_timeout_secs", "must be at least 1"));
        }
        if self.write_timeout_secs == 0 {
            return Err(invalid("write_timeout_secs", "must be at least 1"));
        }
        if self.backoff_base_secs == 0 {
            return Err(invalid("backoff_base_secs", "must be at least 1"));
        }
        if self.backoff_max_secs < self.backoff_base_secs {
            return Err(invalid("backoff_max_secs", "must not be below backoff_base_secs"));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(invalid("backoff_jitter", "must be between 0.0 and 1.0"));
        }
        self.initial_state()?;
        Ok(())
    }

    pub fn initial_state(&self) -> Result<LightState, ConfigError> {
        let base = LightState::default();
        match &self.initial_state {
            None => Ok(base),
            Some(value) => Ok(base.apply(&LightCommand::from_value(value.clone())?)),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        let mut link = LinkConfig::new(self.device_address.to_uppercase());
        link.backoff = BackoffPolicy {
            base: Duration::from_secs(self.backoff_base_secs),
            max: Duration::from_secs(self.backoff_max_secs),
            jitter: self.backoff_jitter,
        };
        link.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        link.write_timeout = Duration::from_secs(self.write_timeout_secs);
        link.settle_delay = Duration::from_millis(self.settle_delay_ms);
        link.frame_gap = Duration::from_millis(self.frame_gap_ms);
        link
    }

    pub fn topics(&self) -> Topics {
        Topics::new(&self.base_topic)
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            broker: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            client_id: self.client_id.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            keep_alive: Duration::from_secs(60),
            topics: self.topics(),
        }
    }
}

fn is_mac_address(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
