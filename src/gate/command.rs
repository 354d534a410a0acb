//! Coin-drop command and its wire format
//!
//! ```json
//! {
//!   "command": "COINDROP",
//!   "payload": { "amount": 30, "drop_count": 3 }
//! }
//! ```
//!
//! Amount and drop count always travel together: the only valid pairs are
//! 30→3, 40→4 and 50→5.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::mqtt::PublishError;

pub const COINDROP_COMMAND: &str = "COINDROP";

/// Raised when a caller asks for an amount outside the fixed table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("Unsupported amount {0}: only 30, 40 and 50 THB are accepted")]
    UnsupportedAmount(u32),
}

/// Accepted payment amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Amount {
    Thb30,
    Thb40,
    Thb50,
}

impl Amount {
    pub const ALL: [Amount; 3] = [Amount::Thb30, Amount::Thb40, Amount::Thb50];

    pub fn value(self) -> u32 {
        match self {
            Amount::Thb30 => 30,
            Amount::Thb40 => 40,
            Amount::Thb50 => 50,
        }
    }

    pub fn drop_count(self) -> u32 {
        match self {
            Amount::Thb30 => 3,
            Amount::Thb40 => 4,
            Amount::Thb50 => 5,
        }
    }

    pub fn label(self) -> String {
        format!("{} THB", self.value())
    }
}

impl TryFrom<u32> for Amount {
    type Error = ContractError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Amount::ALL
            .into_iter()
            .find(|amount| amount.value() == value)
            .ok_or(ContractError::UnsupportedAmount(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoinDrop {
    amount: u32,
    drop_count: u32,
}

/// Serialized command; field order here is the order on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandPayload {
    command: &'static str,
    payload: CoinDrop,
}

impl CommandPayload {
    pub fn coin_drop(amount: Amount) -> Self {
        Self {
            command: COINDROP_COMMAND,
            payload: CoinDrop {
                amount: amount.value(),
                drop_count: amount.drop_count(),
            },
        }
    }

    pub fn amount(&self) -> u32 {
        self.payload.amount
    }

    pub fn drop_count(&self) -> u32 {
        self.payload.drop_count
    }

    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Encode(e.to_string()))
    }
}
