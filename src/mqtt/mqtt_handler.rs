//! MQTT session handling
//!
//! [`MqttHandler`] owns the one broker session: initial connect, topic subscription,
//! reconnect with capped exponential backoff, and routing of report payloads through
//! the decoder into the [`StatusStore`].
//!
//! ```text
//! Disconnected → Connecting → Connected → SubscriptionPending → Subscribed
//!                                 ↑                                  │
//!                            Reconnecting ← ConnectionLost ←─────────┘
//! ```
//!
//! After the first CONNACK the event loop runs in a background task. Connection loss
//! never touches the stored status: readers keep the last good record, whose
//! `last_updated` shows how stale it is.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS, SubAck, SubscribeReasonCode,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{serial_from_topic, MqttConfig};
use super::error::{ConnectError, ConnectionLostError, SubscriptionError};
use super::tls;
use crate::printer::{decoder, StatusRecord, StatusStore};

/// Largest report we accept. Full status pushes exceed rumqttc's 10 KiB default.
const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SubscriptionPending,
    Subscribed,
    ConnectionLost,
    Reconnecting,
    /// Initial connect failed
    Failed,
}

/// Counters describing the running session.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub messages_received: usize,
    pub decode_failures: usize,
    pub reconnects: usize,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
    /// Serial of the device that published most recently
    pub device_serial: Option<String>,
}

/// Capped exponential reconnect delay.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Owner of the broker session and the status it feeds.
pub struct MqttHandler {
    config: MqttConfig,
    store: Arc<StatusStore>,
    state: Arc<watch::Sender<ConnectionState>>,
    stats: Arc<Mutex<SessionStats>>,
    client: Option<AsyncClient>,
    session_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl MqttHandler {
    pub fn new(config: MqttConfig) -> Self {
        Self::with_store(config, Arc::new(StatusStore::new()))
    }

    /// Uses an existing store, e.g. one shared with an HTTP layer.
    pub fn with_store(config: MqttConfig, store: Arc<StatusStore>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            store,
            state: Arc::new(state),
            stats: Arc::new(Mutex::new(SessionStats::default())),
            client: None,
            session_task: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<StatusStore> {
        self.store.clone()
    }

    /// Current status snapshot. Never fails; defaults until the first report.
    pub fn get_status(&self) -> StatusRecord {
        self.store.get()
    }

    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&StatusRecord) + Send + Sync + 'static,
    {
        self.store.set_update_callback(callback);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusRecord> {
        self.store.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        lock_stats(&self.stats).clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            *self.state.borrow(),
            ConnectionState::Connected
                | ConnectionState::SubscriptionPending
                | ConnectionState::Subscribed
        )
    }

    /// Opens the session and waits for the first CONNACK.
    ///
    /// On success the event loop keeps running in a background task that handles
    /// subscription and reconnects. Failure here is not retried.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.session_task.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }
        if self.config.host.trim().is_empty() {
            return Err(ConnectError::InvalidConfig("host is empty".to_string()));
        }

        let broker = self.config.broker_url();
        let options = self.mqtt_options()?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.channel_capacity);

        let mut session = Session::new(
            client.clone(),
            &self.config,
            self.store.clone(),
            self.state.clone(),
            self.stats.clone(),
        );

        session.set_state(ConnectionState::Connecting);
        info!("Connecting to MQTT broker at {}...", broker);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(event) => {
                        let connected = matches!(event, Event::Incoming(Packet::ConnAck(_)));
                        session.handle_event(event);
                        if connected {
                            return Ok(());
                        }
                    }
                    Err(ConnectionError::ConnectionRefused(code)) => {
                        return Err(ConnectError::Refused {
                            broker: broker.clone(),
                            code,
                        });
                    }
                    Err(source) => {
                        return Err(ConnectError::Handshake {
                            broker: broker.clone(),
                            source,
                        });
                    }
                }
            }
        };

        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                broker: broker.clone(),
                timeout,
            }),
        };

        if let Err(e) = result {
            error!("Failed to connect to MQTT broker: {}", e);
            session.set_state(ConnectionState::Failed);
            return Err(e);
        }

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        self.session_task = Some(tokio::spawn(session.run(eventloop, cancel)));
        self.client = Some(client);

        Ok(())
    }

    /// Closes the session, waiting at most `disconnect_timeout` for a clean
    /// DISCONNECT. Safe to call when not connected.
    pub async fn disconnect(&mut self) {
        let Some(mut task) = self.session_task.take() else {
            debug!("Disconnect requested without an active session");
            return;
        };

        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                warn!("Could not queue DISCONNECT: {}", e);
            }
        }

        let timeout = self.config.disconnect_timeout();
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!("Session did not close within {:?}, cancelling", timeout);
            self.cancel.cancel();
            if let Err(e) = task.await {
                error!("Session task ended abnormally: {}", e);
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Disconnected from MQTT broker");
    }

    fn mqtt_options(&self) -> Result<MqttOptions, ConnectError> {
        let keep_alive = self.config.keep_alive_secs;
        if keep_alive != 0 && keep_alive < 5 {
            return Err(ConnectError::InvalidConfig(format!(
                "keep alive of {}s is below the 5s minimum",
                keep_alive
            )));
        }

        let client_id = format!("{}-{}", self.config.client_id_prefix, Utc::now().timestamp());
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options
            .set_credentials(self.config.username.clone(), self.config.password.clone())
            .set_keep_alive(self.config.keep_alive())
            .set_clean_session(true)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE)
            .set_transport(tls::transport(&self.config)?);

        Ok(options)
    }
}

impl Drop for MqttHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the background event loop task.
struct Session {
    client: AsyncClient,
    topic: String,
    auto_discovery: bool,
    store: Arc<StatusStore>,
    state: Arc<watch::Sender<ConnectionState>>,
    stats: Arc<Mutex<SessionStats>>,
    backoff: Backoff,
    has_connected: bool,
}

impl Session {
    fn new(
        client: AsyncClient,
        config: &MqttConfig,
        store: Arc<StatusStore>,
        state: Arc<watch::Sender<ConnectionState>>,
        stats: Arc<Mutex<SessionStats>>,
    ) -> Self {
        Self {
            client,
            topic: config.report_topic(),
            auto_discovery: config.is_auto_discovery(),
            store,
            state,
            stats,
            backoff: Backoff::new(config.reconnect_initial(), config.max_reconnect_interval()),
            has_connected: false,
        }
    }

    async fn run(mut self, mut eventloop: EventLoop, cancel: CancellationToken) {
        debug!("MQTT session task started");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(e) => {
                    let delay = self.handle_connection_error(e);
                    info!("Reconnecting in {:?}", delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("MQTT session task finished");
    }

    /// Returns `false` once the session should stop.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => self.handle_connack(&ack),
            Event::Incoming(Packet::SubAck(ack)) => self.handle_suback(&ack),
            Event::Incoming(Packet::Publish(publish)) => {
                self.handle_publish(&publish.topic, &publish.payload)
            }
            Event::Incoming(Packet::Disconnect) => warn!("Broker sent DISCONNECT"),
            Event::Outgoing(Outgoing::Disconnect) => {
                debug!("DISCONNECT sent, closing session");
                return false;
            }
            other => debug!("MQTT event: {:?}", other),
        }
        true
    }

    fn handle_connack(&mut self, ack: &ConnAck) {
        if ack.code != ConnectReturnCode::Success {
            warn!("CONNACK without success: {:?}", ack.code);
            return;
        }

        if self.has_connected {
            lock_stats(&self.stats).reconnects += 1;
            info!("Reconnected to MQTT broker");
        } else {
            info!("Connected to MQTT broker");
        }
        self.has_connected = true;
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);

        if let Err(e) = self.subscribe() {
            error!("{}", e);
            lock_stats(&self.stats).last_error = Some(e.to_string());
        }
    }

    fn subscribe(&mut self) -> Result<(), SubscriptionError> {
        if self.auto_discovery {
            info!("Auto-discovering printer serial number...");
        }

        self.client
            .try_subscribe(self.topic.clone(), QoS::AtMostOnce)
            .map_err(|source| SubscriptionError::Request {
                topic: self.topic.clone(),
                source,
            })?;

        self.set_state(ConnectionState::SubscriptionPending);
        Ok(())
    }

    fn handle_suback(&mut self, ack: &SubAck) {
        let rejected = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));

        if rejected {
            let e = SubscriptionError::Rejected {
                topic: self.topic.clone(),
            };
            error!("{}", e);
            lock_stats(&self.stats).last_error = Some(e.to_string());
            self.set_state(ConnectionState::Connected);
        } else {
            info!("Subscribed to topic: {}", self.topic);
            self.set_state(ConnectionState::Subscribed);
        }
    }

    fn handle_publish(&mut self, topic: &str, payload: &[u8]) {
        debug!("Received message on topic: {}", topic);

        {
            let mut stats = lock_stats(&self.stats);
            stats.messages_received += 1;
            stats.last_activity = Some(Local::now());

            if let Some(serial) = serial_from_topic(topic) {
                if stats.device_serial.as_deref() != Some(serial) {
                    if self.auto_discovery {
                        info!("Discovered printer serial: {}", serial);
                    }
                    stats.device_serial = Some(serial.to_string());
                }
            }
        }

        match decoder::decode(payload) {
            Ok(status) => self.store.write(status),
            Err(e) => {
                warn!("Error parsing MQTT message on {}: {}", topic, e);
                lock_stats(&self.stats).decode_failures += 1;
            }
        }
    }

    /// Logs the loss and returns how long to wait before polling again.
    fn handle_connection_error(&mut self, e: ConnectionError) -> Duration {
        let e = ConnectionLostError::from(e);
        error!("MQTT {}", e);
        lock_stats(&self.stats).last_error = Some(e.to_string());
        self.set_state(ConnectionState::ConnectionLost);
        self.backoff.next_delay()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }
}

fn lock_stats(stats: &Mutex<SessionStats>) -> MutexGuard<'_, SessionStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
