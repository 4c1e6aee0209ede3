//! Inputs to and audit outputs from the guard.

use serde::{Deserialize, Serialize};

use super::lifecycle::DisableCause;
use super::registry::BlockReason;
use crate::types::{Address, Amount, BlockNumber, Transfer};

/// One step inside a block, reduced in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Transfer(Transfer),
    Revoke {
        caller: Address,
        addresses: Vec<Address>,
        to: Address,
    },
    Unblock {
        caller: Address,
        addresses: Vec<Address>,
    },
    Disable {
        caller: Address,
    },
}

/// Audit record emitted for every state change the guard makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    TradingOpened {
        pool: Address,
        block: BlockNumber,
    },
    Blocked {
        pool: Address,
        blocked: Address,
        reason: BlockReason,
        block: BlockNumber,
    },
    Revoked {
        blocked: Address,
        to: Address,
        #[serde(with = "crate::types::amount_string")]
        amount: Amount,
        block: BlockNumber,
    },
    Unblocked {
        address: Address,
        block: BlockNumber,
    },
    ProtectionDisabled {
        cause: DisableCause,
        block: BlockNumber,
    },
}

impl GuardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::TradingOpened { .. } => "trading_opened",
            GuardEvent::Blocked { .. } => "blocked",
            GuardEvent::Revoked { .. } => "revoked",
            GuardEvent::Unblocked { .. } => "unblocked",
            GuardEvent::ProtectionDisabled { .. } => "protection_disabled",
        }
    }
}
