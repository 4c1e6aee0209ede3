//! Anti-bot liquidity protection for a token's transfer path.
//!
//! The host routes every transfer touching the pool through
//! [`LiquidityGuard`]; the guard flags addresses that trip a launch trap
//! and refuses their outgoing transfers until an administrator revokes
//! or unblocks them.

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod logging;
pub mod storage;
pub mod types;

pub use config::ProtectionConfig;
pub use engine::{BlockReason, GuardEvent, LiquidityGuard, Operation};
pub use error::{GuardError, LedgerError, Result};
pub use ledger::{InMemoryLedger, LedgerFacade};
pub use types::{Address, Amount, BlockHeader, BlockNumber, Transfer};
