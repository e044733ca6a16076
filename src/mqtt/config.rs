use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wildcard report topic used when no serial is configured.
pub const DISCOVERY_TOPIC: &str = "device/+/report";

/// Connection settings for the printer's MQTT broker.
///
/// Passed by value into [`super::mqtt_handler::MqttHandler::new`]; nothing here is
/// read from global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Printer hostname or IP
    pub host: String,
    pub port: u16,
    pub username: String,
    /// LAN access code shown on the printer
    pub password: String,
    /// Printer serial; auto-discovered through the wildcard topic when unset
    pub serial: Option<String>,
    pub use_tls: bool,
    /// Skip certificate verification.
    ///
    /// Printers present a self-signed certificate on the local network, so this
    /// defaults to `true`.
    pub insecure_skip_verify: bool,
    pub keep_alive_secs: u64,
    /// Upper bound for the initial CONNACK
    pub connect_timeout_secs: u64,
    pub reconnect_initial_secs: u64,
    pub max_reconnect_interval_secs: u64,
    pub disconnect_timeout_ms: u64,
    pub client_id_prefix: String,
    /// Request queue size between client handle and event loop
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8883,
            username: "bblp".to_string(),
            password: String::new(),
            serial: None,
            use_tls: true,
            insecure_skip_verify: true,
            keep_alive_secs: 60,
            connect_timeout_secs: 30,
            reconnect_initial_secs: 1,
            max_reconnect_interval_secs: 10,
            disconnect_timeout_ms: 250,
            client_id_prefix: "bambustatus".to_string(),
            channel_capacity: 10,
        }
    }
}

impl MqttConfig {
    /// Configured serial, ignoring blank values.
    pub fn serial(&self) -> Option<&str> {
        self.serial
            .as_deref()
            .map(str::trim)
            .filter(|serial| !serial.is_empty())
    }

    /// Report topic for the configured serial, or the discovery wildcard.
    pub fn report_topic(&self) -> String {
        match self.serial() {
            Some(serial) => format!("device/{}/report", serial),
            None => DISCOVERY_TOPIC.to_string(),
        }
    }

    pub fn is_auto_discovery(&self) -> bool {
        self.serial().is_none()
    }

    /// Broker URL used in log output.
    pub fn broker_url(&self) -> String {
        let scheme = if self.use_tls { "ssl" } else { "tcp" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs)
    }

    pub fn max_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

/// Extracts `<serial>` from a `device/<serial>/report` topic.
pub fn serial_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("device"), Some(serial), Some("report"), None) if !serial.is_empty() => Some(serial),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_serial_selects_device_topic() {
        let config = MqttConfig {
            serial: Some("01S00C123456789".to_string()),
            ..MqttConfig::default()
        };
        assert_eq!(config.report_topic(), "device/01S00C123456789/report");
        assert!(!config.is_auto_discovery());
    }

    #[test]
    fn missing_or_blank_serial_uses_wildcard() {
        let mut config = MqttConfig::default();
        assert_eq!(config.report_topic(), "device/+/report");

        config.serial = Some("   ".to_string());
        assert_eq!(config.report_topic(), DISCOVERY_TOPIC);
        assert!(config.is_auto_discovery());
    }

    #[test]
    fn broker_url_reflects_tls_choice() {
        let mut config = MqttConfig {
            host: "192.168.1.50".to_string(),
            ..MqttConfig::default()
        };
        assert_eq!(config.broker_url(), "ssl://192.168.1.50:8883");

        config.use_tls = false;
        config.port = 1883;
        assert_eq!(config.broker_url(), "tcp://192.168.1.50:1883");
    }

    #[test]
    fn serial_extraction() {
        assert_eq!(serial_from_topic("device/ABC123/report"), Some("ABC123"));
        assert_eq!(serial_from_topic("device//report"), None);
        assert_eq!(serial_from_topic("device/ABC123/request"), None);
        assert_eq!(serial_from_topic("device/ABC123/report/extra"), None);
    }
}
