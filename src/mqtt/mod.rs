//! # MQTT Integration Module
//!
//! Keeps a single long-lived subscription to the printer's built-in MQTT broker and
//! feeds every report it publishes into the shared status store.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Connection settings and topic resolution
//! ├── error.rs         - Connect, connection-loss and subscription errors
//! ├── tls.rs           - TLS transport, including the self-signed certificate mode
//! └── mqtt_handler.rs  - Session state machine, reconnect policy, message routing
//! ```
//!
//! ## Topic Resolution
//!
//! - serial configured: `device/<serial>/report`
//! - no serial: `device/+/report`, whichever printer publishes is shown
//!
//! With the wildcard there is no device selection. If several printers publish on
//! the same broker the status simply follows the most recent report.
//!
//! ## Failure Policy
//!
//! Only the initial connect can fail the caller ([`ConnectError`]). Once running,
//! connection loss, rejected subscriptions and undecodable payloads are logged and
//! contained inside the session; readers keep the last good status.

pub mod config;
pub mod error;
pub mod mqtt_handler;
pub mod tls;

pub use config::MqttConfig;
pub use error::{ConnectError, ConnectionLostError, SubscriptionError};
pub use mqtt_handler::{ConnectionState, MqttHandler, SessionStats};
