//! Publish gating for coin-drop commands
//!
//! 1. [`command`] - accepted amounts and the JSON command payload
//! 2. [`cooldown`] - whole-second countdown started after each acknowledged publish
//! 3. [`publish_gate`] - precondition checks, single-flight and completion handling
//!
//! ```text
//! publish(amount) ──► connected/reconnecting? ──► cooldown idle? ──► nothing in flight?
//!                                                                        │
//!                      ConnectionManager::send ◄── serialize command ◄───┘
//! ```

pub mod command;
pub mod cooldown;
pub mod publish_gate;

pub use command::{Amount, CommandPayload, ContractError};
pub use cooldown::{CooldownTimer, DEFAULT_COOLDOWN_SECS};
pub use publish_gate::{PublishGate, PublishOutcome, SkipReason};
