//! Session Handle - API for the presentation layer
//!
//! Spawns a [`CoinDropSession`] on its own tokio task and hands out the two
//! things a UI needs: a way to request publishes and a watch channel with the
//! current [`SessionView`].

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::session::{CoinDropSession, SessionCommand, SessionView};
use crate::config::AppConfig;
use crate::gate::Amount;
use crate::mqtt::Connector;

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is no longer running")]
    Closed,

    #[error("Session command queue is full")]
    Busy,

    #[error("Session task failed: {0}")]
    Task(String),
}

/// Handle for one running session.
///
/// Dropping the handle closes the command channel, which also tears the session
/// down; [`SessionHandle::teardown`] additionally waits for it to finish.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Initializes the connection and starts the session loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &AppConfig, connector: &dyn Connector) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let session = CoinDropSession::initialize(config, connector, command_rx);
        let view = session.subscribe();

        info!("Spawning coin-drop session task");
        let task = tokio::spawn(async move {
            let closed = session.run().await;
            debug!(
                "Session finished, connection closed: {}",
                closed.connection().is_torn_down()
            );
        });

        Self {
            commands,
            view,
            task,
        }
    }

    /// Requests a publish. Requests the gate cannot honour are dropped by the
    /// session; this only fails when the session has ended or its queue is full.
    pub fn publish(&self, amount: Amount) -> Result<(), SessionError> {
        self.commands
            .try_send(SessionCommand::Publish(amount))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Session busy, dropping publish of {}", amount);
                    SessionError::Busy
                }
                mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
            })
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Tears the session down and waits for the task to finish
    pub async fn teardown(self) -> Result<SessionView, SessionError> {
        if self.commands.send(SessionCommand::Teardown).await.is_err() {
            debug!("Session already stopped before teardown");
        }
        match self.task.await {
            Ok(()) => Ok(self.view.borrow().clone()),
            Err(e) => {
                error!("Session task failed: {}", e);
                Err(SessionError::Task(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::connection::tests::FakeConnector;
    use crate::mqtt::{ConnectionState, TransportEvent};
    use std::time::Duration;

    async fn wait_for(
        rx: &mut watch::Receiver<SessionView>,
        predicate: impl FnMut(&SessionView) -> bool,
    ) -> SessionView {
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session view")
            .expect("session view channel closed")
            .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn publish_flow_through_the_event_loop() {
        let connector = FakeConnector::default();
        let handle = SessionHandle::spawn(&AppConfig::default(), &connector);
        let mut view = handle.subscribe();
        assert_eq!(handle.view().state, ConnectionState::Connecting);

        connector.emit(TransportEvent::Connected);
        wait_for(&mut view, |v| v.state == ConnectionState::Connected).await;

        handle.publish(Amount::Thb50).unwrap();
        wait_for(&mut view, |v| v.in_flight == Some(Amount::Thb50)).await;

        // ignored: a send is already pending
        handle.publish(Amount::Thb30).unwrap();
        connector.emit(TransportEvent::SendCompleted(Ok(())));
        let cooling = wait_for(&mut view, |v| v.cooldown_remaining == 5).await;
        assert_eq!(cooling.in_flight, None);
        assert_eq!(connector.sends().len(), 1);

        let started = tokio::time::Instant::now();
        wait_for(&mut view, |v| v.cooldown_remaining == 0).await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        handle.publish(Amount::Thb30).unwrap();
        wait_for(&mut view, |v| v.in_flight == Some(Amount::Thb30)).await;
        assert_eq!(connector.sends().len(), 2);

        let last = handle.teardown().await.unwrap();
        assert_eq!(last.cooldown_remaining, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_tears_down() {
        let connector = FakeConnector::default();
        let handle = SessionHandle::spawn(&AppConfig::default(), &connector);
        let mut view = handle.subscribe();

        drop(handle);
        // the sender side of the view lives in the session; it closes on exit
        while view.changed().await.is_ok() {}
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn publish_after_teardown_reports_closed() {
        let connector = FakeConnector::default();
        let handle = SessionHandle::spawn(&AppConfig::default(), &connector);
        let commands = handle.commands.clone();
        handle.teardown().await.unwrap();

        let result = commands.try_send(SessionCommand::Publish(Amount::Thb30));
        assert!(matches!(result, Err(mpsc::error::TrySendError::Closed(_))));
    }
}
