//! Node configuration loaded from `weather-node.toml`.
//!
//! [`NodeConfig`] holds the credentials, endpoints and timing budgets the
//! phase handlers read. Missing keys fall back to the defaults below; the
//! `WEATHER_NODE_WIFI_PASSWORD` and `WEATHER_NODE_BROKER_PASSWORD`
//! environment variables take precedence over the file for secrets.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::RetryPolicy;
use crate::error::NodeError;

pub const DEFAULT_CONFIG_PATH: &str = "weather-node.toml";

const WIFI_PASSWORD_ENV: &str = "WEATHER_NODE_WIFI_PASSWORD";
const BROKER_PASSWORD_ENV: &str = "WEATHER_NODE_BROKER_PASSWORD";

/// Top-level configuration, passed into the node before the loop starts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub timing: TimingConfig,
    pub retry: RetryPolicy,
    pub ota: OtaConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host name; also used as the MQTT client id.
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "IoTWeatherStation".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
    /// Dynamic addressing when absent.
    pub static_ip: Option<StaticIp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StaticIp {
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    #[serde(default = "default_subnet")]
    pub subnet: Ipv4Addr,
}

fn default_subnet() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

impl StaticIp {
    /// Whether the gateway sits on the same subnet as the address.
    pub fn gateway_reachable(&self) -> bool {
        let mask = u32::from(self.subnet);
        u32::from(self.ip) & mask == u32::from(self.gateway) & mask
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    /// Prepended as `<prefix>/<topic>` when set.
    pub topic_prefix: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.10".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
            topic_prefix: None,
        }
    }
}

/// Per-phase time budgets, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub network_connect_ms: u64,
    pub network_poll_ms: u64,
    pub ota_window_ms: u64,
    pub broker_connect_ms: u64,
    pub publish_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            network_connect_ms: 5000,
            network_poll_ms: 500,
            ota_window_ms: 5000,
            broker_connect_ms: 3000,
            publish_interval_ms: 10_000,
        }
    }
}

impl TimingConfig {
    pub fn network_connect(&self) -> Duration {
        Duration::from_millis(self.network_connect_ms)
    }

    pub fn network_poll(&self) -> Duration {
        Duration::from_millis(self.network_poll_ms)
    }

    pub fn ota_window(&self) -> Duration {
        Duration::from_millis(self.ota_window_ms)
    }

    pub fn broker_connect(&self) -> Duration {
        Duration::from_millis(self.broker_connect_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    /// Update checks are skipped when no manifest is configured.
    pub manifest_url: Option<String>,
    pub staging_path: PathBuf,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            manifest_url: None,
            staging_path: PathBuf::from("weather-node.update"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    #[default]
    Simulated,
    File,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    pub path: Option<PathBuf>,
    /// Simulated sensor only: fail every n-th read.
    pub fail_every: Option<u32>,
}

impl NodeConfig {
    /// Load the configuration at `path`, falling back to defaults if the file
    /// does not exist. Environment secrets are applied on top.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<NodeConfig>(&contents)?
        } else {
            log::info!("{} not found, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override secrets from the environment; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(WIFI_PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.network.password = password;
        }
        if let Some(password) = lookup(BROKER_PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.broker.password = password;
        }
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.device.name.trim().is_empty() {
            return Err(NodeError::Config("device.name must not be empty".into()));
        }
        if self.broker.host.trim().is_empty() {
            return Err(NodeError::Config("broker.host must not be empty".into()));
        }
        if self.broker.port == 0 {
            return Err(NodeError::Config("broker.port must not be 0".into()));
        }
        if self.timing.publish_interval_ms == 0 {
            return Err(NodeError::Config(
                "timing.publish_interval_ms must be positive".into(),
            ));
        }
        if self.timing.network_poll_ms == 0 {
            return Err(NodeError::Config(
                "timing.network_poll_ms must be positive".into(),
            ));
        }
        if self.sensor.kind == SensorKind::File && self.sensor.path.is_none() {
            return Err(NodeError::Config(
                "sensor.path is required for the file sensor".into(),
            ));
        }
        if let Some(static_ip) = &self.network.static_ip {
            if !static_ip.gateway_reachable() {
                return Err(NodeError::Config(format!(
                    "gateway {} is outside {}/{}",
                    static_ip.gateway, static_ip.ip, static_ip.subnet
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = NodeConfig::default();
        assert_eq!(config.device.name, "IoTWeatherStation");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.timing.network_connect(), Duration::from_secs(5));
        assert_eq!(config.timing.broker_connect(), Duration::from_secs(3));
        assert_eq!(config.timing.publish_interval(), Duration::from_secs(10));
        assert_eq!(config.sensor.kind, SensorKind::Simulated);
        assert!(config.network.static_ip.is_none());
        assert!(config.ota.manifest_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            [network]
            ssid = "garden"
            password = "hunter2"

            [broker]
            host = "mqtt.local"
            topic_prefix = "balcony"

            [timing]
            publish_interval_ms = 60000

            [retry]
            max_retries = 4
        "#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.network.ssid, "garden");
        assert_eq!(config.broker.host, "mqtt.local");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic_prefix.as_deref(), Some("balcony"));
        assert_eq!(config.timing.publish_interval_ms, 60_000);
        assert_eq!(config.timing.network_connect_ms, 5000);
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
    }

    #[test]
    fn deserialize_static_ip_with_default_subnet() {
        let toml_str = r#"
            [network.static_ip]
            ip = "192.168.1.101"
            gateway = "192.168.1.1"
        "#;
        let config: NodeConfig = toml::from_str(toml_str).unwrap();
        let static_ip = config.network.static_ip.unwrap();
        assert_eq!(static_ip.ip, Ipv4Addr::new(192, 168, 1, 101));
        assert_eq!(static_ip.subnet, Ipv4Addr::new(255, 255, 255, 0));
        assert!(static_ip.gateway_reachable());
    }

    #[test]
    fn validate_rejects_gateway_outside_subnet() {
        let mut config = NodeConfig::default();
        config.network.static_ip = Some(StaticIp {
            ip: Ipv4Addr::new(192, 168, 1, 101),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gateway 10.0.0.1"));
    }

    #[test]
    fn validate_rejects_file_sensor_without_path() {
        let mut config = NodeConfig::default();
        config.sensor.kind = SensorKind::File;
        assert!(config.validate().is_err());
        config.sensor.path = Some(PathBuf::from("/tmp/reading.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_port_and_interval() {
        let mut config = NodeConfig::default();
        config.broker.port = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.timing.publish_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_secrets() {
        let mut config = NodeConfig::default();
        config.network.password = "from-file".into();
        config.apply_env(|key| match key {
            "WEATHER_NODE_WIFI_PASSWORD" => Some("from-env".into()),
            "WEATHER_NODE_BROKER_PASSWORD" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.network.password, "from-env");
        assert!(config.broker.password.is_empty());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nname = \"porch\"").unwrap();
        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.device.name, "porch");
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.broker.port, 1883);
    }

    #[test]
    fn load_reports_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker\nport = ").unwrap();
        let err = NodeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, NodeError::Toml(_)));
    }
}
