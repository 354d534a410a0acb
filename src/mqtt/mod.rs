//! # MQTT Integration Module
//!
//! Owns the broker side of the coin-drop simulator: one connection per session,
//! its lifecycle as an observable state, and acknowledged (QoS 1) sends to the
//! device topic.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs      - Broker settings and endpoint parsing
//! ├── connection.rs  - ConnectionManager and its state machine
//! ├── error.rs       - ConnectionError / PublishError
//! └── transport.rs   - Transport/Connector seams and the rumqttc driver
//! ```
//!
//! ## Design Philosophy
//!
//! - **Events, not callbacks**: the transport reports everything it observes as a
//!   [`TransportEvent`] on a channel; the manager applies them one at a time in
//!   the order they were emitted.
//! - **Owned handle**: the transport is held by exactly one [`ConnectionManager`]
//!   and is closed, not just dropped, on teardown.
//! - **Errors become state**: connect and publish failures never escape as panics;
//!   they land in `ConnectionState::Error` and `last_error`.

pub mod config;
pub mod connection;
pub mod error;
pub mod transport;

pub use config::{BrokerEndpoint, BrokerScheme, MqttConfig};
pub use connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, DeliveryOptions, EventReceiver,
    EventSender, TransportEvent,
};
pub use error::{ConnectionError, PublishError};
pub use transport::{Connector, MqttConnector, Transport};
