use serde::Serialize;
use thiserror::Error;

use crate::engine::registry::BlockReason;
use crate::types::{Address, Amount, BlockNumber};

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("caller is not the administrator")]
    NotAdministrator,

    #[error("protection removed")]
    ProtectionDisabled,

    #[error("{reason}: blocked")]
    TransferBlocked { reason: BlockReason },

    #[error("LiquidityActivityTrap: {trades} trades in window exceeds {limit}")]
    TriggerReverted { trades: u32, limit: u32 },

    #[error("block {got} is older than current block {current}")]
    BlockOutOfOrder { current: BlockNumber, got: BlockNumber },

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// True for errors that only revert the transfer they were raised for.
    pub fn is_revert(&self) -> bool {
        matches!(
            self,
            GuardError::TransferBlocked { .. } | GuardError::TriggerReverted { .. } | GuardError::Ledger(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LedgerError {
    #[error("insufficient balance for {who}: need {needed}, have {available}")]
    InsufficientBalance {
        who: Address,
        #[serde(with = "crate::types::amount_string")]
        needed: Amount,
        #[serde(with = "crate::types::amount_string")]
        available: Amount,
    },

    #[error("balance overflow crediting {who}")]
    Overflow { who: Address },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, GuardError>;
