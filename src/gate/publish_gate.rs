use tracing::{debug, info, warn};

use super::command::{Amount, CommandPayload};
use super::cooldown::CooldownTimer;
use crate::mqtt::{ConnectionManager, ConnectionState, DeliveryOptions, PublishError};

/// Why a publish request was dropped without touching the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotConnected(ConnectionState),
    CoolingDown(u32),
    InFlight(Amount),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport; completion follows as a `SendCompleted` event
    Dispatched,
    /// Precondition failed, nothing changed
    Skipped(SkipReason),
    /// The transport refused the send straight away
    Failed(PublishError),
}

/// Guards command submission: connection precondition, single-flight and cooldown
#[derive(Debug)]
pub struct PublishGate {
    topic: String,
    cooldown_secs: u32,
    cooldown: CooldownTimer,
    in_flight: Option<Amount>,
}

impl PublishGate {
    pub fn new(topic: impl Into<String>, cooldown_secs: u32) -> Self {
        Self {
            topic: topic.into(),
            cooldown_secs,
            cooldown: CooldownTimer::new(),
            in_flight: None,
        }
    }

    /// Returns the reason a publish would be dropped right now, if any
    pub fn check(&self, state: ConnectionState) -> Option<SkipReason> {
        if !state.accepts_publish() {
            return Some(SkipReason::NotConnected(state));
        }
        if self.cooldown.is_active() {
            return Some(SkipReason::CoolingDown(self.cooldown.remaining()));
        }
        self.in_flight.map(SkipReason::InFlight)
    }

    pub fn publish(&mut self, amount: Amount, connection: &mut ConnectionManager) -> PublishOutcome {
        if let Some(reason) = self.check(connection.state()) {
            debug!("Publish of {} skipped: {:?}", amount, reason);
            return PublishOutcome::Skipped(reason);
        }

        let payload = match CommandPayload::coin_drop(amount).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                connection.record_send_result(&Err(e.clone()));
                return PublishOutcome::Failed(e);
            }
        };

        self.in_flight = Some(amount);
        match connection.send(&self.topic, payload, DeliveryOptions::acknowledged()) {
            Ok(()) => {
                info!("Publishing COINDROP {} to {}", amount, self.topic);
                PublishOutcome::Dispatched
            }
            Err(e) => {
                warn!("Publish of {} failed immediately: {}", amount, e);
                self.in_flight = None;
                connection.record_send_result(&Err(e.clone()));
                PublishOutcome::Failed(e)
            }
        }
    }

    /// Applies the transport's verdict on the in-flight send. Success starts the
    /// cooldown; failure leaves it idle so the user can retry at once.
    pub fn complete(&mut self, result: Result<(), PublishError>, connection: &mut ConnectionManager) {
        let Some(amount) = self.in_flight.take() else {
            debug!("Send completion with nothing in flight: {:?}", result);
            return;
        };

        connection.record_send_result(&result);
        match result {
            Ok(()) => {
                info!(
                    "COINDROP {} acknowledged, cooling down for {}s",
                    amount, self.cooldown_secs
                );
                self.cooldown.start(self.cooldown_secs);
            }
            Err(e) => warn!("COINDROP {} failed: {}", amount, e),
        }
    }

    pub fn tick(&mut self) -> u32 {
        self.cooldown.tick()
    }

    pub async fn next_tick(&mut self) -> u32 {
        self.cooldown.next_tick().await
    }

    pub fn teardown(&mut self) {
        self.cooldown.cancel();
        self.in_flight = None;
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn in_flight(&self) -> Option<Amount> {
        self.in_flight
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown.remaining()
    }

    pub fn cooldown_secs(&self) -> u32 {
        self.cooldown_secs
    }

    pub fn cooldown_active(&self) -> bool {
        self.cooldown.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::cooldown::DEFAULT_COOLDOWN_SECS;
    use crate::mqtt::connection::tests::FakeConnector;
    use crate::mqtt::{MqttConfig, TransportEvent};

    const TOPIC: &str = "device/ESP32-D15644";

    fn connected(connector: &FakeConnector) -> ConnectionManager {
        let (mut manager, _rx) = ConnectionManager::initialize(connector, &MqttConfig::default());
        manager.handle_event(&TransportEvent::Connected);
        manager
    }

    #[test]
    fn publish_sends_the_serialized_command() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        assert_eq!(gate.publish(Amount::Thb30, &mut manager), PublishOutcome::Dispatched);
        assert_eq!(gate.in_flight(), Some(Amount::Thb30));

        let sends = connector.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].topic, TOPIC);
        assert_eq!(
            sends[0].payload,
            br#"{"command":"COINDROP","payload":{"amount":30,"drop_count":3}}"#.to_vec()
        );
    }

    #[test]
    fn second_publish_while_pending_is_dropped() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        gate.publish(Amount::Thb40, &mut manager);
        assert_eq!(
            gate.publish(Amount::Thb50, &mut manager),
            PublishOutcome::Skipped(SkipReason::InFlight(Amount::Thb40))
        );
        assert_eq!(connector.sends().len(), 1);
    }

    #[test]
    fn gate_closed_unless_connected_or_reconnecting() {
        let connector = FakeConnector::default();
        let (mut manager, _rx) = ConnectionManager::initialize(&connector, &MqttConfig::default());
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        for event in [
            None,
            Some(TransportEvent::Closed),
            Some(TransportEvent::Error("refused".to_string())),
        ] {
            if let Some(event) = event {
                manager.handle_event(&event);
            }
            let state = manager.state();
            assert_eq!(
                gate.publish(Amount::Thb30, &mut manager),
                PublishOutcome::Skipped(SkipReason::NotConnected(state))
            );
        }
        assert!(connector.sends().is_empty());
        // a skipped publish leaves the error untouched
        assert_eq!(manager.last_error(), Some("refused"));

        manager.handle_event(&TransportEvent::Reconnecting);
        assert_eq!(gate.publish(Amount::Thb30, &mut manager), PublishOutcome::Dispatched);
        assert_eq!(connector.sends().len(), 1);
    }

    #[test]
    fn success_starts_cooldown_that_blocks_publishing() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        gate.publish(Amount::Thb50, &mut manager);
        gate.complete(Ok(()), &mut manager);

        assert_eq!(gate.in_flight(), None);
        assert_eq!(gate.cooldown_remaining(), DEFAULT_COOLDOWN_SECS);
        assert_eq!(manager.status().messages_sent, 1);
        assert_eq!(
            gate.publish(Amount::Thb30, &mut manager),
            PublishOutcome::Skipped(SkipReason::CoolingDown(5))
        );
        assert_eq!(connector.sends().len(), 1);
    }

    #[test]
    fn failed_send_does_not_gate_a_retry() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        gate.publish(Amount::Thb40, &mut manager);
        gate.complete(Err(PublishError::ConnectionLost), &mut manager);

        assert_eq!(gate.cooldown_remaining(), 0);
        assert_eq!(gate.in_flight(), None);
        assert_eq!(
            manager.last_error(),
            Some(PublishError::ConnectionLost.to_string().as_str())
        );

        assert_eq!(gate.publish(Amount::Thb40, &mut manager), PublishOutcome::Dispatched);
        assert_eq!(manager.last_error(), None);
        assert_eq!(connector.sends().len(), 2);
    }

    #[test]
    fn immediate_rejection_clears_in_flight() {
        let connector = FakeConnector {
            reject_sends: true,
            ..FakeConnector::default()
        };
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        let outcome = gate.publish(Amount::Thb30, &mut manager);
        assert!(matches!(outcome, PublishOutcome::Failed(PublishError::Rejected(_))));
        assert_eq!(gate.in_flight(), None);
        assert_eq!(gate.cooldown_remaining(), 0);
        assert!(manager.last_error().is_some());
    }

    #[test]
    fn stray_completion_is_ignored() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, DEFAULT_COOLDOWN_SECS);

        gate.complete(Ok(()), &mut manager);
        assert_eq!(gate.cooldown_remaining(), 0);
        assert_eq!(manager.status().messages_sent, 0);
    }

    #[test]
    fn cooldown_expiry_reopens_the_gate() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, 5);

        gate.publish(Amount::Thb50, &mut manager);
        gate.complete(Ok(()), &mut manager);
        for _ in 0..5 {
            gate.tick();
        }

        assert_eq!(gate.cooldown_remaining(), 0);
        assert_eq!(gate.publish(Amount::Thb50, &mut manager), PublishOutcome::Dispatched);
    }

    #[test]
    fn teardown_cancels_cooldown_and_in_flight() {
        let connector = FakeConnector::default();
        let mut manager = connected(&connector);
        let mut gate = PublishGate::new(TOPIC, 5);

        gate.publish(Amount::Thb50, &mut manager);
        gate.complete(Ok(()), &mut manager);
        gate.teardown();

        assert!(!gate.cooldown_active());
        assert_eq!(gate.in_flight(), None);
    }
}
