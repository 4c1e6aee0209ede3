//! Protection parameters.
//!
//! Every trap is configured once at construction and never changes
//! afterwards. Values come from defaults, environment overrides
//! ([`ProtectionConfig::from_env`]) or a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::types::{Amount, BlockNumber, PERCENT_UNIT};

const TOKEN: Amount = 1_000_000_000_000_000_000;

/// Longest trap window accepted. The activity ring is sized from it.
pub const MAX_WINDOW_BLOCKS: BlockNumber = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstBlockTrapConfig {
    pub enabled: bool,
}

impl Default for FirstBlockTrapConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountTrapConfig {
    pub enabled: bool,
    /// Window length counted from the first trade block.
    pub blocks: BlockNumber,
    /// Buy size that trips the trap.
    #[serde(with = "crate::types::amount_string")]
    pub amount: Amount,
    /// Measure the buyer's total buys over the window instead of the single buy.
    pub cumulative: bool,
}

impl Default for AmountTrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocks: 5,
            amount: 12_333_333 * TOKEN,
            cumulative: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PercentTrapConfig {
    pub enabled: bool,
    pub blocks: BlockNumber,
    /// Share of the pool balance, fixed point over [`PERCENT_UNIT`].
    #[serde(with = "crate::types::amount_string")]
    pub percent: u128,
    /// Measure the buyer's total buys in the current block instead of the single buy.
    pub cumulative: bool,
}

impl Default for PercentTrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocks: 6,
            percent: PERCENT_UNIT / 25, // 4%
            cumulative: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityTrapConfig {
    pub enabled: bool,
    /// Sliding window length, also the eligibility window after the first trade.
    pub blocks: BlockNumber,
    /// Highest number of trades tolerated inside one window.
    pub count: u32,
}

impl Default for ActivityTrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocks: 3,
            count: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub first_block_trap: FirstBlockTrapConfig,
    pub amount_trap: AmountTrapConfig,
    pub percent_trap: PercentTrapConfig,
    pub activity_trap: ActivityTrapConfig,
    /// Protection switches itself off once a block at or after this unix
    /// timestamp is opened.
    pub protected_until: Option<u64>,
    /// Addresses per revoke/unblock batch.
    pub revoke_batch_size: usize,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            first_block_trap: FirstBlockTrapConfig::default(),
            amount_trap: AmountTrapConfig::default(),
            percent_trap: PercentTrapConfig::default(),
            activity_trap: ActivityTrapConfig::default(),
            protected_until: None,
            revoke_batch_size: 50,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes")
    })
}

impl ProtectionConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            first_block_trap: FirstBlockTrapConfig {
                enabled: env_flag("FIRST_BLOCK_TRAP").unwrap_or(d.first_block_trap.enabled),
            },
            amount_trap: AmountTrapConfig {
                enabled: env_flag("AMOUNT_TRAP").unwrap_or(d.amount_trap.enabled),
                blocks: env_parse("AMOUNT_TRAP_BLOCKS").unwrap_or(d.amount_trap.blocks),
                amount: env_parse("AMOUNT_TRAP_AMOUNT").unwrap_or(d.amount_trap.amount),
                cumulative: env_flag("AMOUNT_TRAP_CUMULATIVE").unwrap_or(d.amount_trap.cumulative),
            },
            percent_trap: PercentTrapConfig {
                enabled: env_flag("PERCENT_TRAP").unwrap_or(d.percent_trap.enabled),
                blocks: env_parse("PERCENT_TRAP_BLOCKS").unwrap_or(d.percent_trap.blocks),
                percent: env_parse("PERCENT_TRAP_PERCENT").unwrap_or(d.percent_trap.percent),
                cumulative: env_flag("PERCENT_TRAP_CUMULATIVE").unwrap_or(d.percent_trap.cumulative),
            },
            activity_trap: ActivityTrapConfig {
                enabled: env_flag("ACTIVITY_TRAP").unwrap_or(d.activity_trap.enabled),
                blocks: env_parse("ACTIVITY_TRAP_BLOCKS").unwrap_or(d.activity_trap.blocks),
                count: env_parse("ACTIVITY_TRAP_COUNT").unwrap_or(d.activity_trap.count),
            },
            protected_until: env_parse("PROTECTED_UNTIL").or(d.protected_until),
            revoke_batch_size: env_parse("REVOKE_BATCH_SIZE").unwrap_or(d.revoke_batch_size),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Every trap switched off. Useful as a base for single-trap setups.
    pub fn all_disabled() -> Self {
        let mut cfg = Self::default();
        cfg.first_block_trap.enabled = false;
        cfg.amount_trap.enabled = false;
        cfg.percent_trap.enabled = false;
        cfg.activity_trap.enabled = false;
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.amount_trap.enabled && self.amount_trap.blocks == 0 {
            return Err(GuardError::InvalidConfig("amount_trap.blocks must be > 0".into()));
        }
        if self.percent_trap.enabled && self.percent_trap.blocks == 0 {
            return Err(GuardError::InvalidConfig("percent_trap.blocks must be > 0".into()));
        }
        if self.percent_trap.percent > PERCENT_UNIT {
            return Err(GuardError::InvalidConfig(format!(
                "percent_trap.percent {} exceeds 100% ({})",
                self.percent_trap.percent, PERCENT_UNIT
            )));
        }
        if self.activity_trap.enabled && self.activity_trap.blocks == 0 {
            return Err(GuardError::InvalidConfig("activity_trap.blocks must be > 0".into()));
        }
        // A zero limit would revert the opening trade forever.
        if self.activity_trap.enabled && self.activity_trap.count == 0 {
            return Err(GuardError::InvalidConfig("activity_trap.count must be > 0".into()));
        }
        let windows = [
            ("amount_trap.blocks", self.amount_trap.enabled, self.amount_trap.blocks),
            ("percent_trap.blocks", self.percent_trap.enabled, self.percent_trap.blocks),
            ("activity_trap.blocks", self.activity_trap.enabled, self.activity_trap.blocks),
        ];
        for (name, enabled, blocks) in windows {
            if enabled && blocks > MAX_WINDOW_BLOCKS {
                return Err(GuardError::InvalidConfig(format!(
                    "{} {} exceeds {}",
                    name, blocks, MAX_WINDOW_BLOCKS
                )));
            }
        }
        if self.revoke_batch_size == 0 {
            return Err(GuardError::InvalidConfig("revoke_batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Ring size for the activity window: the longest history any trap reads.
    pub fn window_capacity(&self) -> usize {
        let mut cap = 1;
        if self.activity_trap.enabled {
            cap = cap.max(self.activity_trap.blocks);
        }
        if self.amount_trap.enabled && self.amount_trap.cumulative {
            cap = cap.max(self.amount_trap.blocks);
        }
        usize::try_from(cap.min(MAX_WINDOW_BLOCKS)).unwrap_or(1)
    }
}
