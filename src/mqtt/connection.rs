//! Broker connection lifecycle
//!
//! [`ConnectionManager`] owns the single transport for the lifetime of a session and
//! turns transport lifecycle events into an observable [`ConnectionState`].
//!
//! # State Machine
//!
//! ```text
//! initialize ──► Connecting ──► Connected ◄──► Reconnecting
//!                                   │               │
//!                                   └──► Disconnected ◄┘
//!
//!   any state ──(transport error)──► Error
//! ```
//!
//! No state is terminal: the transport keeps retrying from `Disconnected` and
//! `Error` until the manager is torn down.
//!
//! The state is only ever written by [`ConnectionManager::handle_event`] (transport
//! signals) and by [`ConnectionManager::initialize`].

use std::fmt;

use chrono::{DateTime, Local};
use rumqttc::QoS;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::MqttConfig;
use super::error::PublishError;
use super::transport::{Connector, Transport};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// States in which a publish may be handed to the transport
    pub fn accepts_publish(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting...",
            Self::Disconnected => "Disconnected",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Signals emitted by a transport, delivered in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection
    Connected,
    /// The transport is about to retry a lost or failed connection
    Reconnecting,
    /// An established connection was closed
    Closed,
    /// Connect refused, timed out or otherwise failed
    Error(String),
    /// Outcome of the last `Transport::send`
    SendCompleted(Result<(), PublishError>),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Delivery options for a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    pub qos: QoS,
}

impl DeliveryOptions {
    /// QoS 1: the send completes once the broker has acknowledged it
    pub fn acknowledged() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

pub struct ConnectionManager {
    client: Option<Box<dyn Transport>>,
    client_id: String,
    status: ConnectionStatus,
    torn_down: bool,
}

impl ConnectionManager {
    /// Opens a new connection under a freshly generated client id.
    ///
    /// Starts in `Connecting` with no error. If the connector refuses the settings
    /// outright (e.g. an unparsable broker url) the manager is returned without a
    /// client, in `Error`, with the reason in `last_error`.
    pub fn initialize(connector: &dyn Connector, config: &MqttConfig) -> (Self, EventReceiver) {
        let client_id = generate_client_id(&config.client_id_prefix);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            "Connecting to {} as {} (topic {})",
            config.broker_url, client_id, config.topic
        );

        let mut manager = Self {
            client: None,
            client_id,
            status: ConnectionStatus::default(),
            torn_down: false,
        };

        match connector.connect(config, &manager.client_id, events_tx) {
            Ok(client) => manager.client = Some(client),
            Err(e) => {
                error!("Unable to open broker connection: {}", e);
                manager.status.state = ConnectionState::Error;
                manager.status.last_error = Some(e.to_string());
            }
        }

        (manager, events_rx)
    }

    /// Applies a lifecycle event. Send completions are accepted here too so the
    /// caller can feed the event stream through unchanged; they only touch
    /// activity bookkeeping via [`Self::record_send_result`].
    pub fn handle_event(&mut self, event: &TransportEvent) {
        if self.torn_down {
            debug!("Ignoring {:?} after teardown", event);
            return;
        }

        let previous = self.status.state;
        match event {
            TransportEvent::Connected => {
                self.status.state = ConnectionState::Connected;
                self.status.last_error = None;
            }
            TransportEvent::Reconnecting => self.status.state = ConnectionState::Reconnecting,
            TransportEvent::Closed => self.status.state = ConnectionState::Disconnected,
            TransportEvent::Error(message) => {
                self.status.state = ConnectionState::Error;
                self.status.last_error = Some(message.clone());
            }
            TransportEvent::SendCompleted(_) => return,
        }

        if previous != self.status.state {
            self.status.last_activity = Some(Local::now());
            match self.status.state {
                ConnectionState::Error => warn!(
                    "Connection {} -> {}: {}",
                    previous,
                    self.status.state,
                    self.status.last_error.as_deref().unwrap_or("unknown error")
                ),
                _ => info!("Connection {} -> {}", previous, self.status.state),
            }
        }
    }

    /// Hands one publish to the transport. Never retries.
    ///
    /// Clears `last_error` for the new attempt. `Ok` only means the transport took
    /// the message; the broker acknowledgement arrives later as
    /// `TransportEvent::SendCompleted`.
    pub fn send(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        options: DeliveryOptions,
    ) -> Result<(), PublishError> {
        self.status.last_error = None;
        let client = self.client.as_mut().ok_or(PublishError::NotConnected)?;
        debug!(
            "Sending {} bytes to {} with {:?}",
            payload.len(),
            topic,
            options.qos
        );
        client.send(topic, payload, options.qos)
    }

    pub fn record_send_result(&mut self, result: &Result<(), PublishError>) {
        match result {
            Ok(()) => {
                self.status.messages_sent += 1;
                self.status.last_activity = Some(Local::now());
            }
            Err(e) => self.status.last_error = Some(e.to_string()),
        }
    }

    /// Aborts the connection without draining and releases the client.
    /// Safe before the first `Connected` and safe to repeat.
    pub fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            info!("Closing broker connection {}", self.client_id);
            client.close();
        }
        self.torn_down = true;
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.status.last_error.as_deref()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn generate_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}
