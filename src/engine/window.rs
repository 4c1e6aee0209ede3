//! Per-block trade tallies over a bounded ring of recent blocks.

use serde::{Deserialize, Serialize};

use crate::types::{Address, Amount, BlockNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub block: BlockNumber,
    /// Counterparty of the pool.
    pub trader: Address,
    pub direction: Direction,
    #[serde(with = "crate::types::amount_string")]
    pub amount: Amount,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    block: Option<BlockNumber>,
    trades: Vec<TradeEvent>,
}

#[derive(Debug, Clone)]
pub struct ActivityWindow {
    slots: Vec<Slot>,
}

impl ActivityWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![Slot::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, block: BlockNumber) -> usize {
        (block % self.slots.len() as u64) as usize
    }

    /// Append a trade to `block`. Blocks arrive in non-decreasing order, so
    /// a slot holding an older block is simply reused.
    pub fn record_trade(&mut self, block: BlockNumber, trader: Address, direction: Direction, amount: Amount) {
        let idx = self.index(block);
        let slot = &mut self.slots[idx];
        if slot.block != Some(block) {
            slot.block = Some(block);
            slot.trades.clear();
        }
        slot.trades.push(TradeEvent {
            block,
            trader,
            direction,
            amount,
        });
    }

    /// Trades recorded for exactly `block`; empty when the slot is stale.
    pub fn trades_at(&self, block: BlockNumber) -> &[TradeEvent] {
        let slot = &self.slots[self.index(block)];
        if slot.block == Some(block) {
            &slot.trades
        } else {
            &[]
        }
    }

    /// Trades in `[current - window_len + 1, current]`, oldest block first,
    /// submission order within a block. Reads are clamped to the ring.
    pub fn trades_in_window(
        &self,
        current: BlockNumber,
        window_len: BlockNumber,
    ) -> impl Iterator<Item = &TradeEvent> + Clone + '_ {
        let len = window_len.min(self.slots.len() as u64);
        let start = current.saturating_sub(len.saturating_sub(1));
        let blocks = if len == 0 { 1..=0 } else { start..=current };
        blocks.flat_map(move |b| self.trades_at(b).iter())
    }

    pub fn count_in_window(&self, current: BlockNumber, window_len: BlockNumber) -> usize {
        self.trades_in_window(current, window_len).count()
    }

    /// Total bought by `trader` in the window.
    pub fn bought_in_window(&self, trader: &Address, current: BlockNumber, window_len: BlockNumber) -> Amount {
        self.trades_in_window(current, window_len)
            .filter(|t| t.trader == *trader && t.direction == Direction::Buy)
            .fold(0, |acc: Amount, t| acc.saturating_add(t.amount))
    }
}
