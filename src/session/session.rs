//! Coin-drop session with a statum lifecycle
//!
//! A session owns one [`ConnectionManager`] and one [`PublishGate`] and processes
//! every input on a single task, one event at a time:
//!
//! ```text
//! TransportEvent ──┐
//! cooldown tick  ──┼──► CoinDropSession<Running>::run ──► watch::Sender<SessionView>
//! SessionCommand ──┘
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! initialize ──► Running ──(teardown)──► TornDown
//! ```
//!
//! `teardown` consumes the running session, so it happens exactly once.

use chrono::{DateTime, Local};
use statum::{machine, state};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::gate::{Amount, PublishGate, PublishOutcome};
use crate::mqtt::{ConnectionManager, ConnectionState, Connector, EventReceiver, TransportEvent};

/// Requests from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Publish(Amount),
    Teardown,
}

/// Everything the presentation layer reads
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub in_flight: Option<Amount>,
    pub cooldown_remaining: u32,
    pub cooldown_total: u32,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
    pub broker_url: String,
    pub topic: String,
    pub client_id: String,
}

impl SessionView {
    /// Amount buttons are offered only while connected, idle and not cooling down
    pub fn controls_enabled(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.cooldown_remaining == 0
            && self.in_flight.is_none()
    }

    /// Elapsed share of the cooldown in percent, 0 when idle
    pub fn cooldown_progress(&self) -> f32 {
        if self.cooldown_remaining == 0 || self.cooldown_total == 0 {
            return 0.0;
        }
        100.0 - (self.cooldown_remaining as f32 / self.cooldown_total as f32) * 100.0
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionLifecycle {
    Running,
    TornDown,
}

#[machine]
pub struct CoinDropSession<S: SessionLifecycle> {
    connection: ConnectionManager,
    gate: PublishGate,
    events: EventReceiver,
    events_open: bool,
    commands: mpsc::Receiver<SessionCommand>,
    view: watch::Sender<SessionView>,
    broker_url: String,
}

impl<S: SessionLifecycle> CoinDropSession<S> {
    pub fn snapshot(&self) -> SessionView {
        let status = self.connection.status();
        SessionView {
            state: status.state,
            last_error: status.last_error.clone(),
            in_flight: self.gate.in_flight(),
            cooldown_remaining: self.gate.cooldown_remaining(),
            cooldown_total: self.gate.cooldown_secs(),
            messages_sent: status.messages_sent,
            last_activity: status.last_activity,
            broker_url: self.broker_url.clone(),
            topic: self.gate.topic().to_string(),
            client_id: self.connection.client_id().to_string(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn gate(&self) -> &PublishGate {
        &self.gate
    }
}

impl CoinDropSession<Running> {
    /// Opens the broker connection and arms an idle gate
    pub fn initialize(
        config: &AppConfig,
        connector: &dyn Connector,
        commands: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let mqtt = config.mqtt();
        let (connection, events) = ConnectionManager::initialize(connector, &mqtt);
        let gate = PublishGate::new(mqtt.topic.clone(), config.publish.cooldown_secs);

        let placeholder = SessionView {
            state: connection.state(),
            last_error: None,
            in_flight: None,
            cooldown_remaining: 0,
            cooldown_total: config.publish.cooldown_secs,
            messages_sent: 0,
            last_activity: None,
            broker_url: mqtt.broker_url.clone(),
            topic: mqtt.topic.clone(),
            client_id: connection.client_id().to_string(),
        };
        let (view, _) = watch::channel(placeholder);

        let session = Self::new(
            connection,
            gate,
            events,
            true, // events_open
            commands,
            view,
            mqtt.broker_url,
        );
        session.publish_view();
        session
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SendCompleted(result) => {
                self.gate.complete(result, &mut self.connection);
            }
            lifecycle => self.connection.handle_event(&lifecycle),
        }
    }

    pub fn publish(&mut self, amount: Amount) -> PublishOutcome {
        self.gate.publish(amount, &mut self.connection)
    }

    pub fn tick(&mut self) -> u32 {
        self.gate.tick()
    }

    /// Event loop. Returns once a teardown is requested or every command
    /// sender is gone.
    pub async fn run(mut self) -> CoinDropSession<TornDown> {
        info!("Session {} running", self.connection.client_id());

        loop {
            tokio::select! {
                biased;

                event = self.events.recv(), if self.events_open => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        debug!("Transport event channel closed");
                        self.events_open = false;
                    }
                },

                remaining = self.gate.next_tick(), if self.gate.cooldown_active() => {
                    debug!("Cooldown tick, {}s remaining", remaining);
                }

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Publish(amount)) => {
                        self.publish(amount);
                    }
                    Some(SessionCommand::Teardown) | None => break,
                },
            }

            self.publish_view();
        }

        self.teardown()
    }

    /// Aborts the connection and cancels the cooldown
    pub fn teardown(mut self) -> CoinDropSession<TornDown> {
        info!("Tearing down session {}", self.connection.client_id());
        self.gate.teardown();
        self.connection.teardown();
        self.events.close();
        self.events_open = false;
        self.publish_view();
        self.transition()
    }

    fn publish_view(&self) {
        let snapshot = self.snapshot();
        self.view.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl CoinDropSession<TornDown> {
    pub fn is_closed(&self) -> bool {
        self.connection.is_torn_down() && !self.gate.cooldown_active()
    }
}
