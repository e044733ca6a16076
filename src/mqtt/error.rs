//! Error types for the MQTT session

use std::time::Duration;

use rumqttc::{ClientError, ConnectReturnCode, ConnectionError};
use thiserror::Error;

/// Initial connection failure. Fatal to startup; never retried.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Broker {broker} refused the connection: {code:?}")]
    Refused {
        broker: String,
        code: ConnectReturnCode,
    },

    #[error("Handshake with {broker} failed: {source}")]
    Handshake {
        broker: String,
        #[source]
        source: ConnectionError,
    },

    #[error("No CONNACK from {broker} within {timeout:?}")]
    Timeout { broker: String, timeout: Duration },

    #[error("Session already running")]
    AlreadyConnected,
}

/// Connection dropped after a successful connect. Triggers a reconnect.
#[derive(Debug, Error)]
#[error("Connection lost: {0}")]
pub struct ConnectionLostError(#[from] pub ConnectionError);

/// Subscription could not be established on a live connection.
///
/// Only a full reconnect cycle retries the subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Failed to queue subscription to {topic}: {source}")]
    Request {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("Broker rejected subscription to {topic}")]
    Rejected { topic: String },
}
