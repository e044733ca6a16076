//! Live status for Bambu Lab printers.
//!
//! Subscribes to the printer's MQTT report topic, normalizes each report into a
//! [`printer::StatusRecord`], and keeps the latest one readable from any thread.
//!
//! ```text
//! broker ─► MqttHandler ─► decoder ─► StatusStore ─► get_status() / subscribers
//! ```

pub mod config;
pub mod mqtt;
pub mod printer;

pub use config::{AppConfig, ConfigError};
pub use mqtt::{ConnectError, ConnectionState, MqttConfig, MqttHandler};
pub use printer::{DecodeError, StatusRecord, StatusStore};
