//! Blocked addresses and why they were blocked.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GuardError;
use crate::types::{Address, BlockNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockReason {
    FirstBlockTrap,
    AmountTrap,
    PercentTrap,
    ActivityTrap,
}

impl BlockReason {
    /// Tag used in revert messages and audit events.
    pub fn tag(&self) -> &'static str {
        match self {
            BlockReason::FirstBlockTrap => "FirstBlockTrap",
            BlockReason::AmountTrap => "LiquidityAmountTrap",
            BlockReason::PercentTrap => "LiquidityPercentTrap",
            BlockReason::ActivityTrap => "LiquidityActivityTrap",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BlockReason {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FirstBlockTrap" => Ok(BlockReason::FirstBlockTrap),
            "LiquidityAmountTrap" | "AmountTrap" => Ok(BlockReason::AmountTrap),
            "LiquidityPercentTrap" | "PercentTrap" => Ok(BlockReason::PercentTrap),
            "LiquidityActivityTrap" | "ActivityTrap" => Ok(BlockReason::ActivityTrap),
            other => Err(GuardError::InvalidConfig(format!("unknown block reason {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub reason: BlockReason,
    pub blocked_at: BlockNumber,
}

#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    records: HashMap<Address, BlockRecord>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, who: &Address) -> bool {
        self.records.contains_key(who)
    }

    pub fn record(&self, who: &Address) -> Option<&BlockRecord> {
        self.records.get(who)
    }

    /// Returns true when `who` was not blocked before. An existing record
    /// keeps its original reason and block.
    pub fn block(&mut self, who: Address, reason: BlockReason, at: BlockNumber) -> bool {
        if self.records.contains_key(&who) {
            return false;
        }
        self.records.insert(who, BlockRecord { reason, blocked_at: at });
        true
    }

    /// Removes and returns the record, if any.
    pub fn clear(&mut self, who: &Address) -> Option<BlockRecord> {
        self.records.remove(who)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by address, for stable output and hashing.
    pub fn entries(&self) -> Vec<(Address, BlockRecord)> {
        let mut out: Vec<_> = self.records.iter().map(|(a, r)| (*a, *r)).collect();
        out.sort_by_key(|(a, _)| *a);
        out
    }
}

impl FromIterator<(Address, BlockRecord)> for BlockRegistry {
    fn from_iter<I: IntoIterator<Item = (Address, BlockRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reblock_keeps_original_reason() {
        let mut reg = BlockRegistry::new();
        let a = Address::from_low_u64(7);
        assert!(reg.block(a, BlockReason::AmountTrap, 3));
        assert!(!reg.block(a, BlockReason::ActivityTrap, 4));
        let rec = reg.record(&a).unwrap();
        assert_eq!(rec.reason, BlockReason::AmountTrap);
        assert_eq!(rec.blocked_at, 3);
    }

    #[test]
    fn test_clear() {
        let mut reg = BlockRegistry::new();
        let a = Address::from_low_u64(7);
        assert!(reg.clear(&a).is_none());
        reg.block(a, BlockReason::FirstBlockTrap, 1);
        assert!(reg.is_blocked(&a));
        assert_eq!(reg.clear(&a).map(|r| r.reason), Some(BlockReason::FirstBlockTrap));
        assert!(!reg.is_blocked(&a));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_reason_tags_parse_back() {
        for reason in [
            BlockReason::FirstBlockTrap,
            BlockReason::AmountTrap,
            BlockReason::PercentTrap,
            BlockReason::ActivityTrap,
        ] {
            assert_eq!(reason.tag().parse::<BlockReason>().unwrap(), reason);
        }
        assert_eq!(BlockReason::ActivityTrap.to_string(), "LiquidityActivityTrap");
    }
}
