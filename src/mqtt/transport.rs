//! Transport seam and its rumqttc implementation
//!
//! The connection manager only talks to [`Connector`] and [`Transport`]. The
//! production [`MqttConnector`] spawns an [`EventLoopDriver`] task that polls the
//! rumqttc event loop and translates what it sees into [`TransportEvent`]s:
//!
//! ```text
//! rumqttc EventLoop ──poll──► EventLoopDriver ──[TransportEvent]──► session loop
//!        ▲                                                              │
//!        └──────────── AsyncClient::try_publish ◄── MqttTransport ◄─────┘
//! ```
//!
//! rumqttc reconnects whenever `poll` is called again after an error, so the driver
//! implements the reconnect policy by sleeping for the configured period and then
//! polling again.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError as ClientConnectionError, Event, EventLoop, MqttOptions,
    NetworkOptions, Outgoing, Packet, QoS, Request,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::{BrokerEndpoint, MqttConfig};
use super::connection::{EventSender, TransportEvent};
use super::error::{ConnectionError, PublishError};

/// Capacity of rumqttc's request channel between client and event loop
const REQUEST_CAPACITY: usize = 10;

/// An established (or establishing) broker connection owned by one manager
pub trait Transport: Send {
    /// Queues one publish without blocking. The outcome is reported later as
    /// `TransportEvent::SendCompleted`.
    fn send(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError>;

    /// Drops the connection immediately, discarding anything in flight
    fn close(&mut self);
}

/// Factory for transports; lifecycle signals go to `events`
pub trait Connector {
    fn connect(
        &self,
        config: &MqttConfig,
        client_id: &str,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, ConnectionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MqttConnector;

impl Connector for MqttConnector {
    fn connect(
        &self,
        config: &MqttConfig,
        client_id: &str,
        events: EventSender,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        let endpoint = BrokerEndpoint::parse(&config.broker_url)?;
        debug!("Resolved broker endpoint {:?}", endpoint);

        let mut mqtt_options = MqttOptions::new(client_id, endpoint.broker_addr(), endpoint.port);
        mqtt_options
            .set_clean_session(true)
            .set_keep_alive(config.keep_alive)
            .set_transport(endpoint.wire_transport());

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(config.connect_timeout.as_secs());
        eventloop.set_network_options(network_options);

        let cancel = CancellationToken::new();
        let driver = EventLoopDriver {
            eventloop,
            events,
            reconnect_period: config.reconnect_period,
            cancel: cancel.clone(),
            connected: false,
            awaiting_ack: None,
        };

        info!("Spawning MQTT event loop driver for {}", endpoint);
        let task = tokio::spawn(driver.run());

        Ok(Box::new(MqttTransport {
            client,
            cancel,
            task: Some(task),
        }))
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Transport for MqttTransport {
    fn send(&mut self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), PublishError> {
        if self.task.is_none() {
            return Err(PublishError::NotConnected);
        }
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }

    fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("MQTT event loop driver aborted");
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Polls the rumqttc event loop and reports lifecycle and acknowledgement events
pub struct EventLoopDriver {
    eventloop: EventLoop,
    events: EventSender,
    reconnect_period: Duration,
    cancel: CancellationToken,
    connected: bool,
    // packet id of the outgoing QoS 1 publish waiting for its PUBACK
    awaiting_ack: Option<u16>,
}

impl EventLoopDriver {
    pub async fn run(mut self) {
        loop {
            if self.events.is_closed() {
                debug!("Event receiver dropped, stopping MQTT driver");
                break;
            }

            let polled = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(event) => self.on_event(event),
                Err(e) => {
                    self.on_error(e);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_period) => {}
                    }
                    self.emit(TransportEvent::Reconnecting);
                }
            }
        }
        info!("MQTT event loop driver stopped");
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => {
                debug!("ConnAck received: {:?}", connack);
                self.connected = true;
                self.emit(TransportEvent::Connected);
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                debug!("Publish {} written to broker", pkid);
                self.awaiting_ack = Some(pkid);
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                if self.awaiting_ack == Some(ack.pkid) {
                    debug!("Publish {} acknowledged", ack.pkid);
                    self.awaiting_ack = None;
                    self.emit(TransportEvent::SendCompleted(Ok(())));
                } else {
                    trace!("Ignoring PubAck for unknown packet {}", ack.pkid);
                }
            }
            other => trace!("MQTT event: {:?}", other),
        }
    }

    fn on_error(&mut self, err: ClientConnectionError) {
        if let Some(pkid) = self.awaiting_ack.take() {
            warn!("Publish {} lost with the connection", pkid);
            self.discard_pending_publish(pkid);
            self.emit(TransportEvent::SendCompleted(Err(
                PublishError::ConnectionLost,
            )));
        }

        if self.connected {
            self.connected = false;
            warn!("Broker connection closed: {}", err);
            self.emit(TransportEvent::Closed);
        } else {
            error!("Broker connection failed: {}", err);
            self.emit(TransportEvent::Error(describe_error(&err)));
        }
    }

    // rumqttc requeues unacknowledged publishes for the next session; a publish
    // already reported as lost must never reach the broker afterwards
    fn discard_pending_publish(&mut self, pkid: u16) {
        let before = self.eventloop.pending.len();
        self.eventloop.pending.retain(|request| match request {
            Request::Publish(publish) => publish.pkid != pkid,
            _ => true,
        });
        if self.eventloop.pending.len() != before {
            debug!("Dropped publish {} from the retransmit queue", pkid);
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Dropping transport event, receiver is gone");
        }
    }
}

fn describe_error(err: &ClientConnectionError) -> String {
    match err {
        ClientConnectionError::ConnectionRefused(code) => {
            format!("Connection refused by broker: {:?}", code)
        }
        ClientConnectionError::NetworkTimeout => "Connection timed out".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish};
    use tokio::sync::mpsc;

    use crate::mqtt::connection::EventReceiver;

    const RECONNECT: Duration = Duration::from_millis(2000);

    // the event loop is never polled, so nothing touches the network
    fn driver(connected: bool) -> (EventLoopDriver, EventReceiver, AsyncClient) {
        let options = MqttOptions::new("coindrop-test", "127.0.0.1", 1);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events, rx) = mpsc::unbounded_channel();
        let driver = EventLoopDriver {
            eventloop,
            events,
            reconnect_period: RECONNECT,
            cancel: CancellationToken::new(),
            connected,
            awaiting_ack: None,
        };
        (driver, rx, client)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn requeued_publish(pkid: u16) -> Request {
        let mut publish = Publish::new("device/test", QoS::AtLeastOnce, b"{}".to_vec());
        publish.pkid = pkid;
        Request::Publish(publish)
    }

    fn puback(pkid: u16) -> Event {
        Event::Incoming(Packet::PubAck(PubAck::new(pkid)))
    }

    #[test]
    fn connack_reports_connected() {
        let (mut driver, mut rx, _client) = driver(false);
        driver.on_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));

        assert!(driver.connected);
        assert_eq!(drain(&mut rx), vec![TransportEvent::Connected]);
    }

    #[test]
    fn puback_completes_only_the_awaited_publish() {
        let (mut driver, mut rx, _client) = driver(true);
        driver.on_event(Event::Outgoing(Outgoing::Publish(7)));

        driver.on_event(puback(3));
        assert!(drain(&mut rx).is_empty());

        driver.on_event(puback(7));
        assert_eq!(drain(&mut rx), vec![TransportEvent::SendCompleted(Ok(()))]);

        // a duplicate ack after completion is ignored as well
        driver.on_event(puback(7));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn failure_while_connected_reports_closed() {
        let (mut driver, mut rx, _client) = driver(true);
        driver.on_error(ClientConnectionError::NetworkTimeout);

        assert!(!driver.connected);
        assert_eq!(drain(&mut rx), vec![TransportEvent::Closed]);
    }

    #[test]
    fn failure_before_connect_reports_error() {
        let (mut driver, mut rx, _client) = driver(false);
        driver.on_error(ClientConnectionError::NetworkTimeout);

        assert_eq!(
            drain(&mut rx),
            vec![TransportEvent::Error("Connection timed out".to_string())]
        );
    }

    #[test]
    fn connection_lost_only_when_an_ack_was_awaited() {
        let (mut driver, mut rx, _client) = driver(true);
        driver.on_event(Event::Outgoing(Outgoing::Publish(1)));
        driver.on_event(puback(1));
        drain(&mut rx);

        driver.on_error(ClientConnectionError::NetworkTimeout);
        assert_eq!(drain(&mut rx), vec![TransportEvent::Closed]);
    }

    #[test]
    fn lost_publish_is_not_retransmitted() {
        let (mut driver, mut rx, _client) = driver(true);
        driver.on_event(Event::Outgoing(Outgoing::Publish(1)));

        // what rumqttc's clean() leaves behind when the link drops
        driver.eventloop.pending.push_back(requeued_publish(1));
        driver.eventloop.pending.push_back(Request::PubAck(PubAck::new(9)));
        driver.on_error(ClientConnectionError::NetworkTimeout);

        assert_eq!(
            drain(&mut rx),
            vec![
                TransportEvent::SendCompleted(Err(PublishError::ConnectionLost)),
                TransportEvent::Closed,
            ]
        );
        assert_eq!(driver.eventloop.pending.len(), 1);
        assert!(!driver
            .eventloop
            .pending
            .iter()
            .any(|request| matches!(request, Request::Publish(_))));

        // a later ack for the same packet id cannot complete anything
        driver.on_event(puback(1));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn publish_never_written_stays_queued() {
        let (mut driver, mut rx, _client) = driver(true);
        driver.eventloop.pending.push_back(requeued_publish(2));
        driver.on_error(ClientConnectionError::NetworkTimeout);

        assert_eq!(drain(&mut rx), vec![TransportEvent::Closed]);
        assert_eq!(driver.eventloop.pending.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_before_reconnecting() {
        let (mut driver, mut rx, _client) = driver(false);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(5);
        driver.eventloop.set_network_options(network_options);
        let cancel = driver.cancel.clone();
        let task = tokio::spawn(driver.run());

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Error(_)));
        let failed_at = tokio::time::Instant::now();

        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Reconnecting);
        assert!(failed_at.elapsed() >= RECONNECT);

        cancel.cancel();
        task.await.unwrap();
    }
}
