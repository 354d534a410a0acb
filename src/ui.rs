//! # Console presentation layer
//!
//! A line-driven stand-in for the payment-simulation page: it renders the
//! [`SessionView`] whenever it changes and turns typed amounts into publish
//! requests.
//!
//! ```text
//! stdin ──► parse_input ──► SessionHandle::publish
//!                                   │
//! stdout ◄── render_status ◄── watch::Receiver<SessionView>
//! ```
//!
//! It only ever offers amounts from the fixed table and keeps the controls
//! disabled while the broker is not connected, a cooldown is running or a
//! publish is in flight.

use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::gate::{Amount, ContractError};
use crate::session::{SessionHandle, SessionView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiInput {
    Publish(Amount),
    Status,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("Unknown command '{0}', type 'help' for a list")]
    Unknown(String),
}

pub fn parse_input(line: &str) -> Result<Option<UiInput>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let input = match line.to_ascii_lowercase().as_str() {
        "status" | "s" => UiInput::Status,
        "help" | "h" | "?" => UiInput::Help,
        "quit" | "q" | "exit" => UiInput::Quit,
        other => {
            let value = other
                .trim_end_matches("thb")
                .trim()
                .parse::<u32>()
                .map_err(|_| InputError::Unknown(line.to_string()))?;
            UiInput::Publish(Amount::try_from(value)?)
        }
    };
    Ok(Some(input))
}

pub fn render_status(view: &SessionView) -> String {
    let mut line = format!("[{}] {} -> {}", view.state, view.broker_url, view.topic);

    if let Some(amount) = view.in_flight {
        line.push_str(&format!(" | publishing {}...", amount));
    }
    if view.cooldown_remaining > 0 {
        line.push_str(&format!(
            " | cooldown {}s ({:.0}%)",
            view.cooldown_remaining,
            view.cooldown_progress()
        ));
    }
    if view.controls_enabled() {
        let labels: Vec<String> = Amount::ALL.iter().map(|a| a.label()).collect();
        line.push_str(&format!(" | ready: {}", labels.join(" / ")));
    }
    if let Some(error) = &view.last_error {
        line.push_str(&format!(" | MQTT error: {}", error));
    }
    line
}

fn help_text() -> String {
    let amounts: Vec<String> = Amount::ALL.iter().map(|a| a.value().to_string()).collect();
    format!(
        "Commands: {} (publish COINDROP), status, help, quit",
        amounts.join(" | ")
    )
}

pub struct ConsoleUi<W: Write> {
    handle: SessionHandle,
    out: W,
}

impl<W: Write> ConsoleUi<W> {
    pub fn new(handle: SessionHandle, out: W) -> Self {
        Self { handle, out }
    }

    /// Runs until `quit`, end of input or ctrl-c, then tears the session down.
    /// Returns the final view.
    pub async fn run<R>(mut self, input: R) -> Result<SessionView>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut view = self.handle.subscribe();

        self.print(&help_text())?;
        self.print(&render_status(&self.handle.view()))?;

        loop {
            tokio::select! {
                changed = view.changed() => {
                    if changed.is_err() {
                        warn!("Session ended unexpectedly");
                        break;
                    }
                    let status = render_status(&view.borrow_and_update());
                    self.print(&status)?;
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("Input closed");
                        break;
                    };
                    if !self.handle_line(&line)? {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.handle
            .teardown()
            .await
            .map_err(|e| eyre!("Failed to tear down session: {}", e))
    }

    // false once the user asked to quit
    fn handle_line(&mut self, line: &str) -> Result<bool> {
        match parse_input(line) {
            Ok(None) => {}
            Ok(Some(UiInput::Quit)) => return Ok(false),
            Ok(Some(UiInput::Help)) => self.print(&help_text())?,
            Ok(Some(UiInput::Status)) => self.print(&render_status(&self.handle.view()))?,
            Ok(Some(UiInput::Publish(amount))) => {
                let view = self.handle.view();
                if view.controls_enabled() {
                    self.handle
                        .publish(amount)
                        .map_err(|e| eyre!("Publish request failed: {}", e))?;
                } else {
                    self.print(&format!("{} is not available right now", amount.label()))?;
                }
            }
            Err(e) => self.print(&e.to_string())?,
        }
        Ok(true)
    }

    fn print(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(())
    }
}
